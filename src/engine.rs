//! The caller-facing facade.
//!
//! `Engine` wires the queue, matcher, pairing creator, voting state machine,
//! presence tracking and guardian around one store, clock, config and event
//! sink. It is `Send + Sync`; share it behind an `Arc` to call it from
//! several threads or hand it to the background workers.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, DefaultClock};
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::EngineError;
use crate::events::{EventSink, LogSink};
use crate::guardian::Guardian;
use crate::lock::InMemoryLockManager;
use crate::matching::{Candidate, Matcher, Matchmaker};
use crate::model::{
    MatchId, MatchStatus, Outcome, Profile, Tier, UserId, UserState, UserStatus, VoteChoice,
};
use crate::pairing::PairCreator;
use crate::presence::{Disconnect, Presence};
use crate::queue::{Queue, QueueEntry};
use crate::store::{InMemoryStore, StateStore};
use crate::voting::{VoteReceipt, Voting};

/// What a caller sees about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub state: UserStatus,
    pub match_id: Option<MatchId>,
    pub partner_id: Option<UserId>,
    pub vote_window_expires_at: Option<DateTime<Utc>>,
    pub fairness: u8,
    pub last_outcome: Option<Outcome>,
}

/// Everything one engine tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub disconnects: Vec<Disconnect>,
    pub resolved: Vec<(MatchId, Outcome)>,
    pub unready_cancelled: Vec<MatchId>,
    pub created: Vec<MatchId>,
}

pub struct Engine<S = InMemoryStore> {
    ctx: Context<S>,
    queue: Queue<S>,
    matcher: Matcher<S>,
    pairing: PairCreator<S>,
    matchmaker: Matchmaker<S>,
    voting: Voting<S>,
    presence: Presence<S>,
    guardian: Guardian<S>,
}

pub struct EngineBuilder<S> {
    store: S,
    clock: Arc<dyn Clock + Send + Sync>,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
}

impl<S: StateStore> EngineBuilder<S> {
    pub fn with_clock<C: Clock + Send + Sync + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sink<K: EventSink + 'static>(mut self, sink: K) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine<S> {
        let ctx = Context {
            store: Arc::new(self.store),
            clock: self.clock,
            config: Arc::new(self.config),
            sink: self.sink,
            locks: Arc::new(InMemoryLockManager::new()),
        };
        Engine {
            queue: Queue::new(ctx.clone()),
            matcher: Matcher::new(ctx.clone()),
            pairing: PairCreator::new(ctx.clone()),
            matchmaker: Matchmaker::new(ctx.clone()),
            voting: Voting::new(ctx.clone()),
            presence: Presence::new(ctx.clone()),
            guardian: Guardian::new(ctx.clone()),
            ctx,
        }
    }
}

impl Engine<InMemoryStore> {
    /// An engine over a fresh in-memory store, using the system clock and
    /// logging events through `tracing`.
    pub fn in_memory(config: EngineConfig) -> Self {
        Engine::builder(InMemoryStore::new())
            .with_config(config)
            .build()
    }
}

impl<S: StateStore> Engine<S> {
    pub fn builder(store: S) -> EngineBuilder<S> {
        EngineBuilder {
            store,
            clock: Arc::new(DefaultClock),
            config: EngineConfig::default(),
            sink: Arc::new(LogSink::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.ctx.store
    }

    /// Per-user and per-match holds used by pairing and voting.
    pub fn locks(&self) -> &InMemoryLockManager {
        &self.ctx.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    pub fn guardian(&self) -> &Guardian<S> {
        &self.guardian
    }

    /// Create or replace a user's profile. New users start idle.
    pub fn register_user(&self, profile: Profile) -> Result<(), EngineError> {
        profile.validate().map_err(EngineError::InvalidProfile)?;
        let now = self.ctx.now();
        let user_id = profile.user_id.clone();
        self.ctx.store.transact(|tx| -> Result<(), EngineError> {
            if tx.user(&user_id).is_none() {
                tx.put_user(UserState::new(user_id.clone(), now));
            }
            tx.put_profile(profile);
            Ok(())
        })?;
        info!(user_id = %user_id, "user registered");
        Ok(())
    }

    /// `user_id` never wants to see `blocked` again. Blocks apply both ways.
    pub fn block_user(&self, user_id: &UserId, blocked: &UserId) -> Result<(), EngineError> {
        self.ctx.store.transact(|tx| {
            if tx.profile(blocked).is_none() {
                return Err(EngineError::UnknownUser(blocked.clone()));
            }
            let mut profile = tx
                .profile(user_id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownUser(user_id.clone()))?;
            profile.blocked.insert(blocked.clone());
            tx.put_profile(profile);
            Ok(())
        })?;
        debug!(user_id = %user_id, blocked = %blocked, "user blocked");
        Ok(())
    }

    pub fn join_queue(&self, user_id: &UserId) -> Result<UserState, EngineError> {
        self.queue.join(user_id)
    }

    pub fn leave_queue(&self, user_id: &UserId) -> Result<UserState, EngineError> {
        self.queue.leave(user_id)
    }

    /// Live waiting users, highest priority first.
    pub fn candidates(&self) -> Result<Vec<QueueEntry>, EngineError> {
        self.queue.candidates()
    }

    pub fn heartbeat(&self, user_id: &UserId) -> Result<(), EngineError> {
        self.presence.heartbeat(user_id)
    }

    pub fn get_status(&self, user_id: &UserId) -> Result<StatusView, EngineError> {
        let now = self.ctx.now();
        Ok(self.ctx.store.read(|tables| {
            if tables.profile(user_id).is_none() {
                return Err(EngineError::UnknownUser(user_id.clone()));
            }
            let fresh;
            let user = match tables.user(user_id) {
                Some(user) => user,
                None => {
                    fresh = UserState::new(user_id.clone(), now);
                    &fresh
                }
            };
            let vote_window_expires_at = user
                .match_id
                .and_then(|id| tables.get_match(&id))
                .filter(|m| m.status == MatchStatus::Voting)
                .and_then(|m| m.vote_window_expires_at);
            Ok(StatusView {
                state: user.state,
                match_id: user.match_id,
                partner_id: user.partner_id.clone(),
                vote_window_expires_at,
                fairness: user.fairness,
                last_outcome: user.last_outcome,
            })
        })??)
    }

    pub fn record_vote(
        &self,
        user_id: &UserId,
        match_id: &MatchId,
        choice: VoteChoice,
    ) -> Result<VoteReceipt, EngineError> {
        self.voting.record_vote(user_id, match_id, choice)
    }

    pub fn mark_ready(
        &self,
        user_id: &UserId,
        match_id: &MatchId,
    ) -> Result<MatchStatus, EngineError> {
        self.voting.mark_ready(user_id, match_id)
    }

    pub fn find_match(&self, user_id: &UserId) -> Result<Option<Candidate>, EngineError> {
        self.matcher.find_match(user_id, &HashSet::new())
    }

    pub fn create_pair(
        &self,
        a: &UserId,
        b: &UserId,
        tier: Tier,
    ) -> Result<Option<MatchId>, EngineError> {
        self.pairing.create_pair(a, b, tier)
    }

    /// Join the queue if needed, then try to pair. `Ok(None)` means the user
    /// is waiting and a later spin, tick or guardian pass will retry.
    pub fn spin(&self, user_id: &UserId) -> Result<Option<MatchId>, EngineError> {
        self.queue.join(user_id)?;
        self.matchmaker.attempt(user_id)
    }

    pub fn run_matching_cycle(&self) -> Result<Vec<MatchId>, EngineError> {
        self.matchmaker.run_cycle()
    }

    pub fn resolve_expired_votes(&self) -> Result<Vec<(MatchId, Outcome)>, EngineError> {
        self.voting.resolve_expired()
    }

    pub fn expire_unready(&self) -> Result<Vec<MatchId>, EngineError> {
        self.voting.expire_unready()
    }

    pub fn sweep_disconnects(&self) -> Result<Vec<Disconnect>, EngineError> {
        self.presence.sweep_disconnects()
    }

    /// One pass of the periodic work: disconnects, closed vote windows,
    /// unacknowledged pairings, then a matching cycle.
    pub fn tick(&self) -> Result<TickReport, EngineError> {
        let report = TickReport {
            disconnects: self.sweep_disconnects()?,
            resolved: self.resolve_expired_votes()?,
            unready_cancelled: self.expire_unready()?,
            created: self.run_matching_cycle()?,
        };
        debug!(
            disconnects = report.disconnects.len(),
            resolved = report.resolved.len(),
            created = report.created.len(),
            "engine tick"
        );
        Ok(report)
    }
}
