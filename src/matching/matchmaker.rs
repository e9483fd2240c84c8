use std::collections::HashSet;

use tracing::{debug, warn};

use super::Matcher;
use crate::context::Context;
use crate::error::EngineError;
use crate::model::{MatchId, UserId};
use crate::pairing::PairCreator;
use crate::store::StateStore;

/// Candidate selection followed by pairing, retried past stale candidates.
pub(crate) struct Matchmaker<S> {
    ctx: Context<S>,
    matcher: Matcher<S>,
    pairing: PairCreator<S>,
}

impl<S: StateStore> Matchmaker<S> {
    pub fn new(ctx: Context<S>) -> Self {
        Self {
            matcher: Matcher::new(ctx.clone()),
            pairing: PairCreator::new(ctx.clone()),
            ctx,
        }
    }

    /// One spin for `user_id`: find a partner and pair with them.
    ///
    /// A candidate that could not be paired is excluded and a new one is
    /// selected, up to `spin_attempts` times. Never pairs a user who is not
    /// waiting.
    pub fn attempt(&self, user_id: &UserId) -> Result<Option<MatchId>, EngineError> {
        let mut exclude = HashSet::new();
        for attempt in 0..self.ctx.config.spin_attempts.max(1) {
            let Some(candidate) = self.matcher.find_match(user_id, &exclude)? else {
                return Ok(None);
            };
            if let Some(match_id) =
                self.pairing
                    .create_pair(user_id, &candidate.partner_id, candidate.tier)?
            {
                return Ok(Some(match_id));
            }
            debug!(
                user_id = %user_id,
                partner_id = %candidate.partner_id,
                attempt,
                "pairing failed, reselecting"
            );
            exclude.insert(candidate.partner_id);
        }
        Ok(None)
    }

    /// Walk the queue in fairness order and spin for everyone still waiting.
    pub fn run_cycle(&self) -> Result<Vec<MatchId>, EngineError> {
        let now = self.ctx.now();
        let entries = self
            .ctx
            .store
            .queue_entries(now, self.ctx.config.liveness_window)?;

        let mut created = Vec::new();
        let mut paired: HashSet<UserId> = HashSet::new();
        for entry in entries {
            if paired.contains(&entry.user_id) {
                continue;
            }
            match self.attempt(&entry.user_id) {
                Ok(Some(match_id)) => {
                    paired.insert(entry.user_id.clone());
                    if let Some(m) = self.ctx.store.get_match(&match_id)? {
                        paired.extend(m.participants().into_iter().cloned());
                    }
                    created.push(match_id);
                }
                Ok(None) => {}
                Err(err) if err.is_validation() => {
                    warn!(user_id = %entry.user_id, error = %err, "skipping queue entry");
                }
                Err(err) => return Err(err),
            }
        }
        debug!(created = created.len(), "matching cycle finished");
        Ok(created)
    }
}
