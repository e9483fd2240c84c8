//! Heartbeats and the disconnect sweep.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::context::Context;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::model::{MatchId, UserId, UserState, UserStatus};
use crate::store::StateStore;
use crate::voting::Voting;

/// A user the sweep found past the liveness window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub user_id: UserId,
    pub previous: UserStatus,
    pub match_id: Option<MatchId>,
}

pub(crate) struct Presence<S> {
    ctx: Context<S>,
    voting: Voting<S>,
}

impl<S: StateStore> Presence<S> {
    pub fn new(ctx: Context<S>) -> Self {
        Self {
            voting: Voting::new(ctx.clone()),
            ctx,
        }
    }

    /// Refresh `last_active` for a registered user.
    pub fn heartbeat(&self, user_id: &UserId) -> Result<(), EngineError> {
        let now = self.ctx.now();
        self.ctx.store.transact(|tx| {
            if tx.profile(user_id).is_none() {
                return Err(EngineError::UnknownUser(user_id.clone()));
            }
            let mut user = tx
                .user(user_id)
                .cloned()
                .unwrap_or_else(|| UserState::new(user_id.clone(), now));
            user.last_active = now;
            tx.put_user(user);
            Ok(())
        })?;
        debug!(user_id = %user_id, "heartbeat");
        Ok(())
    }

    /// Act on every non-idle user whose heartbeat fell outside the liveness
    /// window.
    ///
    /// Matches are settled first (cancelled if still unacknowledged, resolved
    /// from the votes on hand if voting), then every stale waiting user,
    /// including any the settlement just returned to the queue, goes idle.
    pub fn sweep_disconnects(&self) -> Result<Vec<Disconnect>, EngineError> {
        let now = self.ctx.now();
        let window = self.ctx.config.liveness_window;
        let stale: Vec<Disconnect> = self.ctx.store.read(|tables| {
            tables
                .users()
                .filter(|u| u.state != UserStatus::Idle && !u.is_live(now, window))
                .map(|u| Disconnect {
                    user_id: u.user_id.clone(),
                    previous: u.state,
                    match_id: u.match_id,
                })
                .collect()
        })?;
        if stale.is_empty() {
            return Ok(stale);
        }

        let mut departed_by_match: BTreeMap<MatchId, Vec<UserId>> = BTreeMap::new();
        for gone in &stale {
            if let (true, Some(match_id)) = (gone.previous.is_matched(), gone.match_id) {
                departed_by_match
                    .entry(match_id)
                    .or_default()
                    .push(gone.user_id.clone());
            }
        }
        for (match_id, departed) in &departed_by_match {
            if let Some(outcome) = self.voting.break_match(match_id, departed)? {
                info!(match_id = %match_id, outcome = outcome.as_str(), "match broken by disconnect");
            }
        }

        let stale_ids: BTreeSet<&UserId> = stale.iter().map(|d| &d.user_id).collect();
        let idled = self.ctx.store.transact(|tx| -> Result<Vec<UserId>, EngineError> {
            let mut idled = Vec::new();
            for user_id in &stale_ids {
                let Some(mut user) = tx.user(user_id).cloned() else {
                    continue;
                };
                if user.state == UserStatus::Waiting && !user.is_live(now, window) {
                    user.go_idle();
                    idled.push(user.user_id.clone());
                    tx.put_user(user);
                }
            }
            Ok(idled)
        })?;
        debug!(idled = idled.len(), "stale waiting users idled");

        for gone in &stale {
            info!(user_id = %gone.user_id, previous = ?gone.previous, "disconnect detected");
        }
        self.ctx.emit(
            stale
                .iter()
                .map(|gone| EngineEvent::DisconnectDetected {
                    user_id: gone.user_id.clone(),
                    previous: gone.previous,
                })
                .collect(),
        );
        Ok(stale)
    }
}
