//! Vote window state machine: `paired -> voting -> completed | cancelled`.
//!
//! Everything that reads or writes a match's votes runs under that match's
//! lock, with `now` read once after the lock is held.

mod outcome;

pub use outcome::{disposition, resolve, Disposition};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::deadline;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::model::{
    HistoryEntry, Match, MatchId, MatchStatus, Outcome, UserId, UserState, UserStatus, Vote,
    VoteChoice,
};
use crate::store::{StateStore, Transaction};

/// Result of a recorded vote. `outcome` is set when this vote closed the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub match_id: MatchId,
    pub choice: VoteChoice,
    pub outcome: Option<Outcome>,
}

pub(crate) struct Voting<S> {
    ctx: Context<S>,
}

impl<S: StateStore> Voting<S> {
    pub fn new(ctx: Context<S>) -> Self {
        Self { ctx }
    }

    /// Record `choice` in the caller's slot, replacing any earlier vote.
    pub fn record_vote(
        &self,
        user_id: &UserId,
        match_id: &MatchId,
        choice: VoteChoice,
    ) -> Result<VoteReceipt, EngineError> {
        let _guard = self.ctx.lock_match(match_id)?;
        let now = self.ctx.now();
        let config = &self.ctx.config;

        let mut events = Vec::new();
        let outcome = self.ctx.store.transact(|tx| {
            let m = tx
                .get_match(match_id)
                .cloned()
                .ok_or(EngineError::UnknownMatch(*match_id))?;
            if !m.involves(user_id) {
                return Err(EngineError::NotParticipant {
                    user_id: user_id.clone(),
                    match_id: *match_id,
                });
            }
            if let Some(expired_at) = m.vote_window_expires_at.filter(|_| m.window_closed(now)) {
                return Err(EngineError::ExpiredWindow {
                    match_id: *match_id,
                    expired_at,
                });
            }
            if m.status != MatchStatus::Voting {
                return Err(EngineError::MatchNotActive {
                    match_id: *match_id,
                    status: m.status,
                });
            }

            let mut vote = tx.vote(match_id).cloned().unwrap_or_else(|| Vote::new(*match_id));
            vote.cast(&m, user_id, choice);
            let complete = vote.both_cast();
            tx.put_vote(vote);
            if complete {
                Ok(Some(resolve_in(tx, m, config, now, &mut events)))
            } else {
                Ok(None)
            }
        })?;

        debug!(user_id = %user_id, match_id = %match_id, choice = ?choice, "vote recorded");
        self.ctx.emit(events);
        Ok(VoteReceipt {
            match_id: *match_id,
            choice,
            outcome,
        })
    }

    /// Acknowledge a pairing. The vote window opens once both participants
    /// have acknowledged. Returns the match status afterwards.
    pub fn mark_ready(
        &self,
        user_id: &UserId,
        match_id: &MatchId,
    ) -> Result<MatchStatus, EngineError> {
        let _guard = self.ctx.lock_match(match_id)?;
        let now = self.ctx.now();
        let config = &self.ctx.config;

        let started = self.ctx.store.transact(|tx| {
            let mut m = tx
                .get_match(match_id)
                .cloned()
                .ok_or(EngineError::UnknownMatch(*match_id))?;
            let Some(partner_id) = m.partner_of(user_id).cloned() else {
                return Err(EngineError::NotParticipant {
                    user_id: user_id.clone(),
                    match_id: *match_id,
                });
            };
            match m.status {
                MatchStatus::Paired => {}
                MatchStatus::Voting => return Ok(None),
                status => {
                    return Err(EngineError::MatchNotActive {
                        match_id: *match_id,
                        status,
                    })
                }
            }

            let Some(mut user) = attached_user(tx, user_id, match_id) else {
                return Ok(None);
            };
            user.ready = true;
            tx.put_user(user.clone());

            let Some(partner) = attached_user(tx, &partner_id, match_id).filter(|p| p.ready)
            else {
                return Ok(None);
            };
            let expires_at = vote_deadline(now, config.vote_window)?;
            m.status = MatchStatus::Voting;
            m.vote_window_expires_at = Some(expires_at);
            tx.put_match(m);
            for mut member in [user, partner] {
                member.state = UserStatus::Voting;
                tx.put_user(member);
            }
            Ok(Some(expires_at))
        })?;

        match started {
            Some(expires_at) => {
                info!(match_id = %match_id, %expires_at, "vote window opened");
                self.ctx.emit(vec![EngineEvent::VotingStarted {
                    match_id: *match_id,
                    expires_at,
                }]);
                Ok(MatchStatus::Voting)
            }
            None => Ok(self
                .ctx
                .store
                .get_match(match_id)?
                .map_or(MatchStatus::Paired, |m| m.status)),
        }
    }

    /// Resolve every voting match whose window has closed.
    pub fn resolve_expired(&self) -> Result<Vec<(MatchId, Outcome)>, EngineError> {
        let now = self.ctx.now();
        let due: Vec<MatchId> = self.ctx.store.read(|tables| {
            tables
                .active_matches()
                .filter(|m| m.status == MatchStatus::Voting && m.window_closed(now))
                .map(|m| m.match_id)
                .collect()
        })?;

        let mut resolved = Vec::new();
        for match_id in due {
            let still_due = |m: &Match, now: DateTime<Utc>| {
                m.status == MatchStatus::Voting && m.window_closed(now)
            };
            if let Some(outcome) = self.settle(&match_id, still_due, Settle::Resolve)? {
                resolved.push((match_id, outcome));
            }
        }
        Ok(resolved)
    }

    /// Cancel matches that stayed unacknowledged past `ready_timeout`. Both
    /// participants go back to the queue.
    pub fn expire_unready(&self) -> Result<Vec<MatchId>, EngineError> {
        let now = self.ctx.now();
        let timeout = self.ctx.config.ready_timeout;
        let unready = |m: &Match, now: DateTime<Utc>| {
            m.status == MatchStatus::Paired
                && deadline(m.created_at, timeout).is_some_and(|due| due <= now)
        };
        let due: Vec<MatchId> = self.ctx.store.read(|tables| {
            tables
                .active_matches()
                .filter(|m| unready(m, now))
                .map(|m| m.match_id)
                .collect()
        })?;

        let mut cancelled = Vec::new();
        for match_id in due {
            if self.settle(&match_id, unready, Settle::Cancel(&[]))?.is_some() {
                cancelled.push(match_id);
            }
        }
        Ok(cancelled)
    }

    /// End a match because some participants went away.
    ///
    /// A match still waiting for acknowledgement is cancelled: departed users
    /// go idle, anyone else rejoins with fairness unchanged. A match in its
    /// vote window resolves now, with every departed user's slot counted as
    /// unset, so departed users always end idle.
    pub fn break_match(
        &self,
        match_id: &MatchId,
        departed: &[UserId],
    ) -> Result<Option<Outcome>, EngineError> {
        let _guard = self.ctx.lock_match(match_id)?;
        let now = self.ctx.now();
        let config = &self.ctx.config;
        let mut events = Vec::new();
        let outcome = self.ctx.store.transact(|tx| -> Result<_, EngineError> {
            let Some(m) = tx.get_match(match_id).cloned().filter(Match::is_active) else {
                return Ok(None);
            };
            Ok(Some(match m.status {
                MatchStatus::Voting => {
                    let mut vote = tx
                        .vote(match_id)
                        .cloned()
                        .unwrap_or_else(|| Vote::new(*match_id));
                    for user_id in departed {
                        vote.clear(&m, user_id);
                    }
                    tx.put_vote(vote);
                    resolve_in(tx, m, config, now, &mut events)
                }
                _ => cancel_in(tx, m, departed, now, &mut events),
            }))
        })?;
        self.ctx.emit(events);
        Ok(outcome)
    }

    /// Cancel an active match, returning every participant still attached to
    /// it to the queue. Returns false if the match was already finished.
    pub fn cancel(&self, match_id: &MatchId) -> Result<bool, EngineError> {
        Ok(self
            .settle(match_id, |m, _| m.is_active(), Settle::Cancel(&[]))?
            .is_some())
    }

    fn settle<P>(
        &self,
        match_id: &MatchId,
        still_due: P,
        how: Settle<'_>,
    ) -> Result<Option<Outcome>, EngineError>
    where
        P: FnOnce(&Match, DateTime<Utc>) -> bool,
    {
        let _guard = self.ctx.lock_match(match_id)?;
        let now = self.ctx.now();
        let config = &self.ctx.config;
        let mut events = Vec::new();
        let outcome = self.ctx.store.transact(|tx| -> Result<_, EngineError> {
            let Some(m) = tx.get_match(match_id).cloned() else {
                return Ok(None);
            };
            if !still_due(&m, now) {
                return Ok(None);
            }
            Ok(Some(match how {
                Settle::Resolve => resolve_in(tx, m, config, now, &mut events),
                Settle::Cancel(departed) => cancel_in(tx, m, departed, now, &mut events),
            }))
        })?;
        self.ctx.emit(events);
        Ok(outcome)
    }
}

enum Settle<'a> {
    Resolve,
    Cancel(&'a [UserId]),
}

/// Close `m` from its current vote slots inside `tx`.
pub(crate) fn resolve_in(
    tx: &mut Transaction<'_>,
    mut m: Match,
    config: &EngineConfig,
    now: DateTime<Utc>,
    events: &mut Vec<EngineEvent>,
) -> Outcome {
    let vote = tx
        .vote(&m.match_id)
        .cloned()
        .unwrap_or_else(|| Vote::new(m.match_id));
    let outcome = resolve(vote.user1_vote, vote.user2_vote);

    for (user_id, own) in [(&m.user1_id, vote.user1_vote), (&m.user2_id, vote.user2_vote)] {
        settle_user(tx, &m, user_id, disposition(outcome, own), outcome, config, now);
    }
    if outcome.is_recorded_in_history() {
        tx.record_history(HistoryEntry {
            pair: m.pair(),
            match_id: m.match_id,
            outcome,
            recorded_at: now,
        });
    }
    m.finish(outcome, now);
    info!(match_id = %m.match_id, outcome = outcome.as_str(), "match resolved");
    events.push(resolved_event(&m, outcome));
    tx.put_match(m);
    outcome
}

/// Cancel `m` inside `tx`. Users in `departed` go idle, the rest rejoin.
pub(crate) fn cancel_in(
    tx: &mut Transaction<'_>,
    mut m: Match,
    departed: &[UserId],
    now: DateTime<Utc>,
    events: &mut Vec<EngineEvent>,
) -> Outcome {
    let outcome = Outcome::Cancelled;
    for user_id in [m.user1_id.clone(), m.user2_id.clone()] {
        let how = if departed.contains(&user_id) {
            Disposition::Idle
        } else {
            Disposition::Rejoin { boost: false }
        };
        let user = tx.user(&user_id).cloned();
        if let Some(mut user) = user.filter(|u| u.match_id == Some(m.match_id)) {
            apply(&mut user, how, outcome, 0, 0, now);
            tx.put_user(user);
        }
    }
    m.finish(outcome, now);
    info!(match_id = %m.match_id, "match cancelled");
    events.push(resolved_event(&m, outcome));
    tx.put_match(m);
    outcome
}

/// End of a vote window opened at `now`.
pub(crate) fn vote_deadline(
    now: DateTime<Utc>,
    window: Duration,
) -> Result<DateTime<Utc>, EngineError> {
    deadline(now, window).ok_or(EngineError::DeadlineOverflow {
        from: now,
        after: window,
    })
}

fn attached_user(tx: &Transaction<'_>, user_id: &UserId, match_id: &MatchId) -> Option<UserState> {
    tx.user(user_id)
        .filter(|u| u.match_id == Some(*match_id))
        .cloned()
}

fn settle_user(
    tx: &mut Transaction<'_>,
    m: &Match,
    user_id: &UserId,
    how: Disposition,
    outcome: Outcome,
    config: &EngineConfig,
    now: DateTime<Utc>,
) {
    let Some(mut user) = tx.user(user_id).cloned() else {
        return;
    };
    // Users already moved on (guardian realignment) keep their current state.
    if user.match_id != Some(m.match_id) {
        return;
    }
    apply(&mut user, how, outcome, config.fairness_boost, config.fairness_cap, now);
    tx.put_user(user);
}

fn apply(
    user: &mut UserState,
    how: Disposition,
    outcome: Outcome,
    boost: u8,
    cap: u8,
    now: DateTime<Utc>,
) {
    match how {
        Disposition::VideoDate | Disposition::Idle => user.go_idle(),
        Disposition::Rejoin { boost: boosted } => {
            user.rejoin(now);
            if boosted {
                user.boost(boost, cap);
            }
        }
    }
    user.last_outcome = Some(outcome);
}

fn resolved_event(m: &Match, outcome: Outcome) -> EngineEvent {
    EngineEvent::OutcomeResolved {
        match_id: m.match_id,
        user1_id: m.user1_id.clone(),
        user2_id: m.user2_id.clone(),
        outcome,
    }
}
