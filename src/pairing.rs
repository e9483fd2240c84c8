//! Atomic two-party pairing.
//!
//! Both users' holds are taken low id first with try-lock and backoff, the
//! pair is re-validated under those holds, and the match, vote slots and
//! both state transitions commit in a single transaction.

use tracing::{debug, info};

use crate::context::Context;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::lock;
use crate::matching::hard_eligible;
use crate::model::{Match, MatchId, MatchStatus, PairKey, Tier, UserId, UserStatus, Vote};
use crate::store::StateStore;
use crate::voting::vote_deadline;

pub(crate) struct PairCreator<S> {
    ctx: Context<S>,
}

impl<S: StateStore> PairCreator<S> {
    pub fn new(ctx: Context<S>) -> Self {
        Self { ctx }
    }

    /// Pair `a` with `b`.
    ///
    /// Returns `Ok(None)` when the holds could not be taken within the retry
    /// budget or when either user stopped being available since they were
    /// selected; the caller should pick another candidate.
    pub fn create_pair(
        &self,
        a: &UserId,
        b: &UserId,
        tier: Tier,
    ) -> Result<Option<MatchId>, EngineError> {
        if a == b {
            return Ok(None);
        }
        let pair = PairKey::new(a, b);
        let keys = [
            lock::user_key(pair.low().as_str()),
            lock::user_key(pair.high().as_str()),
        ];
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let config = &self.ctx.config;

        let Some(_guards) =
            lock::try_acquire_ordered(&*self.ctx.locks, &key_refs, &config.backoff())?
        else {
            debug!(pair = %pair, "pairing abandoned under contention");
            return Ok(None);
        };

        let now = self.ctx.now();
        let created = self.ctx.store.transact(|tx| -> Result<Option<Match>, EngineError> {
            let (Some(user_a), Some(user_b)) = (tx.user(a).cloned(), tx.user(b).cloned()) else {
                return Ok(None);
            };
            let available = |user: &crate::model::UserState| {
                user.state == UserStatus::Waiting
                    && user.match_id.is_none()
                    && user.is_live(now, config.liveness_window)
            };
            if !available(&user_a) || !available(&user_b) {
                return Ok(None);
            }
            let eligible = match (tx.profile(a), tx.profile(b)) {
                (Some(pa), Some(pb)) => hard_eligible(pa, pb, tx.in_history(&pair)),
                _ => false,
            };
            if !eligible || tx.active_match_for_pair(&pair).is_some() {
                return Ok(None);
            }

            let mut m = Match::new(a, b, tier, now);
            let member_status = if config.require_ready {
                UserStatus::Paired
            } else {
                m.status = MatchStatus::Voting;
                m.vote_window_expires_at = Some(vote_deadline(now, config.vote_window)?);
                UserStatus::Voting
            };
            for (mut user, partner) in [(user_a, b), (user_b, a)] {
                user.attach(m.match_id, partner.clone(), member_status);
                tx.put_user(user);
            }
            tx.put_vote(Vote::new(m.match_id));
            tx.put_match(m.clone());
            Ok(Some(m))
        })?;

        let Some(m) = created else {
            debug!(pair = %pair, "candidate went stale before commit");
            return Ok(None);
        };

        info!(
            match_id = %m.match_id,
            user1_id = %m.user1_id,
            user2_id = %m.user2_id,
            tier = ?m.tier,
            "match created"
        );
        let mut events = vec![EngineEvent::MatchCreated {
            match_id: m.match_id,
            user1_id: m.user1_id.clone(),
            user2_id: m.user2_id.clone(),
            tier: m.tier,
        }];
        if let Some(expires_at) = m.vote_window_expires_at {
            events.push(EngineEvent::VotingStarted {
                match_id: m.match_id,
                expires_at,
            });
        }
        self.ctx.emit(events);
        Ok(Some(m.match_id))
    }
}
