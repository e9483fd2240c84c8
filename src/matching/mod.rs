//! Tiered partner search.
//!
//! Each tier only runs when the previous one found nobody:
//! exact mutual preferences, then preferences widened by how long the
//! requester has waited, then hard constraints alone.

mod eligibility;
mod matchmaker;
mod relax;

pub use eligibility::{accepts, hard_eligible, mutually_accept};
pub use relax::Widening;

pub(crate) use matchmaker::Matchmaker;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;
use crate::error::EngineError;
use crate::model::{PairKey, Profile, Tier, UserId, UserStatus};
use crate::store::StateStore;

/// A proposed partner and the tier that found them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub partner_id: UserId,
    pub tier: Tier,
}

pub(crate) struct Matcher<S> {
    ctx: Context<S>,
}

impl<S: StateStore> Matcher<S> {
    pub fn new(ctx: Context<S>) -> Self {
        Self { ctx }
    }

    /// Best partner for a waiting user, skipping anyone in `exclude`.
    ///
    /// `Ok(None)` means nobody eligible is waiting right now; callers retry
    /// later. A requester who is not waiting also gets `Ok(None)`.
    pub fn find_match(
        &self,
        user_id: &UserId,
        exclude: &HashSet<UserId>,
    ) -> Result<Option<Candidate>, EngineError> {
        let now = self.ctx.now();
        let config = &self.ctx.config;

        let found = self.ctx.store.read(|tables| -> Result<Option<Candidate>, EngineError> {
            let requester = tables
                .profile(user_id)
                .ok_or_else(|| EngineError::UnknownUser(user_id.clone()))?;
            let waited = match tables.user(user_id) {
                Some(state) if state.state == UserStatus::Waiting => state.wait_time(now),
                _ => return Ok(None),
            };

            let pool: Vec<&Profile> = tables
                .queue_entries(now, config.liveness_window)
                .iter()
                .filter(|entry| &entry.user_id != user_id && !exclude.contains(&entry.user_id))
                .filter_map(|entry| tables.profile(&entry.user_id))
                .filter(|other| {
                    let seen = tables.in_history(&PairKey::new(user_id, &other.user_id));
                    hard_eligible(requester, other, seen)
                })
                .collect();

            let widened = Widening::for_wait(&config.relaxation, waited);
            let tiers = [
                (Tier::Exact, Widening::NONE),
                (Tier::Expanded, widened),
                (Tier::Guaranteed, Widening::ANY),
            ];

            for (tier, widening) in tiers {
                if tier == Tier::Expanded && widening == Widening::NONE {
                    continue;
                }
                if let Some(partner) = pool
                    .iter()
                    .find(|other| mutually_accept(requester, other, widening))
                {
                    return Ok(Some(Candidate {
                        partner_id: partner.user_id.clone(),
                        tier,
                    }));
                }
            }
            Ok(None)
        })??;

        match &found {
            Some(candidate) => debug!(
                user_id = %user_id,
                partner_id = %candidate.partner_id,
                tier = ?candidate.tier,
                "candidate found"
            ),
            None => debug!(user_id = %user_id, "no eligible candidate"),
        }
        Ok(found)
    }
}
