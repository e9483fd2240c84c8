//! Periodic reconciliation.
//!
//! The guardian trusts nothing the request paths did: it re-derives every
//! invariant from stored state and repairs what it finds. Each repair is
//! logged and emitted as a `guardian_correction` event, and a sweep over
//! already-consistent state changes nothing.

mod report;

pub use report::{Correction, SweepReport};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::elapsed;
use crate::context::Context;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::lock::LockManager;
use crate::matching::Matchmaker;
use crate::model::{Match, MatchId, UserId, UserStatus};
use crate::store::StateStore;
use crate::voting::{cancel_in, Voting};

pub struct Guardian<S> {
    ctx: Context<S>,
    voting: Voting<S>,
    matchmaker: Matchmaker<S>,
    running: AtomicBool,
}

/// Clears the running flag when a sweep ends, including by error.
struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: StateStore> Guardian<S> {
    pub(crate) fn new(ctx: Context<S>) -> Self {
        Self {
            voting: Voting::new(ctx.clone()),
            matchmaker: Matchmaker::new(ctx.clone()),
            ctx,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one reconciliation pass. Returns a skipped report, without
    /// touching anything, if another pass is still in progress.
    pub fn sweep(&self) -> Result<SweepReport, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("guardian sweep already running, skipping");
            return Ok(SweepReport::skipped());
        }
        let _running = Running(&self.running);

        type Step<T> = fn(&Guardian<T>) -> Result<Vec<Correction>, EngineError>;
        let steps: [Step<S>; 7] = [
            Self::break_offline_pairs,
            Self::collapse_duplicates,
            Self::realign_states,
            Self::resolve_expired,
            Self::boost_starving,
            Self::force_matches,
            Self::release_stale_locks,
        ];

        let mut corrections = Vec::new();
        for step in steps {
            let fixed = step(self)?;
            self.publish(&fixed);
            corrections.extend(fixed);
        }

        if corrections.is_empty() {
            debug!("guardian sweep clean");
        } else {
            info!(corrections = corrections.len(), "guardian sweep finished");
        }
        Ok(SweepReport {
            skipped: false,
            corrections,
        })
    }

    /// Active matches with a participant outside the liveness window.
    fn break_offline_pairs(&self) -> Result<Vec<Correction>, EngineError> {
        let now = self.ctx.now();
        let window = self.ctx.config.liveness_window;
        let targets: Vec<(MatchId, Vec<UserId>)> = self.ctx.store.read(|tables| {
            tables
                .active_matches()
                .filter_map(|m| {
                    let offline: Vec<UserId> = m
                        .participants()
                        .into_iter()
                        .filter(|id| !tables.user(id).is_some_and(|u| u.is_live(now, window)))
                        .cloned()
                        .collect();
                    (!offline.is_empty()).then_some((m.match_id, offline))
                })
                .collect()
        })?;

        let mut fixed = Vec::new();
        for (match_id, offline) in targets {
            if let Some(outcome) = self.voting.break_match(&match_id, &offline)? {
                fixed.push(Correction::OfflinePairBroken {
                    match_id,
                    offline,
                    outcome,
                });
            }
        }
        Ok(fixed)
    }

    /// Keep each user's oldest active match and cancel the rest.
    fn collapse_duplicates(&self) -> Result<Vec<Correction>, EngineError> {
        let now = self.ctx.now();
        let mut events = Vec::new();
        let fixed = self.ctx.store.transact(|tx| -> Result<_, EngineError> {
            let mut by_user: BTreeMap<UserId, Vec<Match>> = BTreeMap::new();
            for m in tx.committed().active_matches() {
                for user_id in m.participants() {
                    by_user.entry(user_id.clone()).or_default().push(m.clone());
                }
            }

            let mut fixed = Vec::new();
            for (user_id, mut matches) in by_user {
                if matches.len() < 2 {
                    continue;
                }
                matches.sort_by_key(|m| (m.created_at, m.match_id));
                let kept = matches[0].match_id;
                for m in matches.into_iter().skip(1) {
                    if !tx.get_match(&m.match_id).is_some_and(Match::is_active) {
                        continue;
                    }
                    let match_id = m.match_id;
                    cancel_in(tx, m, &[], now, &mut events);
                    fixed.push(Correction::DuplicateMatchCancelled {
                        match_id,
                        user_id: user_id.clone(),
                        kept,
                    });
                }
            }
            Ok(fixed)
        })?;
        self.ctx.emit(events);
        Ok(fixed)
    }

    /// Make user rows agree with the active matches.
    fn realign_states(&self) -> Result<Vec<Correction>, EngineError> {
        let now = self.ctx.now();
        let window = self.ctx.config.liveness_window;
        self.ctx.store.transact(|tx| {
            let active: HashMap<MatchId, Match> = tx
                .committed()
                .active_matches()
                .map(|m| (m.match_id, m.clone()))
                .collect();
            let mut user_ids: Vec<UserId> =
                tx.committed().users().map(|u| u.user_id.clone()).collect();
            user_ids.sort();

            let mut fixed = Vec::new();

            // Participants of an active match must point at it.
            let mut ordered: Vec<&Match> = active.values().collect();
            ordered.sort_by_key(|m| (m.created_at, m.match_id));
            for m in ordered {
                let Some(expected) = m.member_status() else {
                    continue;
                };
                let members = [(&m.user1_id, &m.user2_id), (&m.user2_id, &m.user1_id)];
                for (user_id, partner_id) in members {
                    let Some(mut user) = tx.user(user_id).cloned() else {
                        continue;
                    };
                    let attached = user.match_id == Some(m.match_id);
                    if attached
                        && user.state == expected
                        && user.partner_id.as_ref() == Some(partner_id)
                    {
                        continue;
                    }
                    let before = user.state;
                    if attached {
                        user.state = expected;
                        user.partner_id = Some(partner_id.clone());
                    } else {
                        user.attach(m.match_id, partner_id.clone(), expected);
                    }
                    tx.put_user(user);
                    fixed.push(Correction::StateRealigned {
                        user_id: user_id.clone(),
                        before,
                        after: expected,
                    });
                }
            }

            // Anyone else claiming a match must let go of it.
            for user_id in user_ids {
                let Some(mut user) = tx.user(&user_id).cloned() else {
                    continue;
                };
                let holds_live_match = user
                    .match_id
                    .and_then(|id| active.get(&id))
                    .is_some_and(|m| m.involves(&user_id));
                match (user.state, user.match_id) {
                    (UserStatus::Paired | UserStatus::Voting, _) if !holds_live_match => {
                        let before = user.state;
                        if user.is_live(now, window) {
                            user.rejoin(now);
                        } else {
                            user.go_idle();
                        }
                        fixed.push(Correction::StateRealigned {
                            user_id: user_id.clone(),
                            before,
                            after: user.state,
                        });
                        tx.put_user(user);
                    }
                    (UserStatus::Waiting | UserStatus::Idle, Some(match_id)) => {
                        user.match_id = None;
                        user.partner_id = None;
                        user.ready = false;
                        fixed.push(Correction::DanglingMatchCleared {
                            user_id: user_id.clone(),
                            match_id,
                        });
                        tx.put_user(user);
                    }
                    _ => {}
                }
            }
            Ok(fixed)
        })
    }

    /// Vote windows past their deadline and pairings never acknowledged.
    fn resolve_expired(&self) -> Result<Vec<Correction>, EngineError> {
        let mut fixed: Vec<Correction> = self
            .voting
            .resolve_expired()?
            .into_iter()
            .map(|(match_id, outcome)| Correction::ExpiredVoteResolved { match_id, outcome })
            .collect();
        fixed.extend(
            self.voting
                .expire_unready()?
                .into_iter()
                .map(|match_id| Correction::UnreadyMatchCancelled { match_id }),
        );
        Ok(fixed)
    }

    /// One fairness step for each user waiting longer than the queue
    /// average, at most once per waiting session.
    fn boost_starving(&self) -> Result<Vec<Correction>, EngineError> {
        let now = self.ctx.now();
        let config = &self.ctx.config;
        let entries = self.ctx.store.queue_entries(now, config.liveness_window)?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let total: Duration = entries
            .iter()
            .map(|e| elapsed(e.waiting_since, now))
            .sum();
        let average = total / entries.len() as u32;

        self.ctx.store.transact(|tx| {
            let mut fixed = Vec::new();
            for entry in entries
                .iter()
                .filter(|e| elapsed(e.waiting_since, now) > average)
            {
                let Some(mut user) = tx.user(&entry.user_id).cloned() else {
                    continue;
                };
                if user.state != UserStatus::Waiting
                    || user.starvation_boosted_for == Some(user.waiting_since)
                {
                    continue;
                }
                let before = user.fairness;
                let after = user.boost(config.starvation_boost, config.fairness_cap);
                user.starvation_boosted_for = Some(user.waiting_since);
                tx.put_user(user);
                if after > before {
                    fixed.push(Correction::StarvationBoost {
                        user_id: entry.user_id.clone(),
                        before,
                        after,
                    });
                }
            }
            Ok(fixed)
        })
    }

    /// A matching attempt for everyone waiting past the starvation ceiling.
    fn force_matches(&self) -> Result<Vec<Correction>, EngineError> {
        let now = self.ctx.now();
        let ceiling = self.ctx.config.starvation_ceiling;
        let starving: Vec<UserId> = self
            .ctx
            .store
            .queue_entries(now, self.ctx.config.liveness_window)?
            .into_iter()
            .filter(|e| elapsed(e.waiting_since, now) >= ceiling)
            .map(|e| e.user_id)
            .collect();

        let mut fixed = Vec::new();
        for user_id in starving {
            match self.matchmaker.attempt(&user_id) {
                Ok(Some(match_id)) => fixed.push(Correction::ForcedMatch { user_id, match_id }),
                Ok(None) => debug!(user_id = %user_id, "forced match found nobody"),
                Err(err) if err.is_validation() => {
                    warn!(user_id = %user_id, error = %err, "forced match skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(fixed)
    }

    fn release_stale_locks(&self) -> Result<Vec<Correction>, EngineError> {
        Ok(self
            .ctx
            .locks
            .release_stale(self.ctx.config.stale_lock_after)?
            .into_iter()
            .map(|key| Correction::StaleLockReleased { key })
            .collect())
    }

    fn publish(&self, corrections: &[Correction]) {
        for correction in corrections {
            warn!(
                correction = correction.kind(),
                details = ?correction,
                "guardian correction"
            );
        }
        self.ctx.emit(
            corrections
                .iter()
                .cloned()
                .map(EngineEvent::GuardianCorrection)
                .collect(),
        );
    }
}
