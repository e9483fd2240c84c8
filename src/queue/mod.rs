//! The waiting queue and its fairness ordering.

mod index;

pub use index::{QueueEntry, QueueIndex};

use tracing::{debug, info};

use crate::context::Context;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::model::{Match, UserId, UserState, UserStatus};
use crate::store::StateStore;

pub(crate) struct Queue<S> {
    ctx: Context<S>,
}

impl<S: StateStore> Queue<S> {
    pub fn new(ctx: Context<S>) -> Self {
        Self { ctx }
    }

    /// Put a registered user in the queue.
    ///
    /// A user already waiting keeps their place and only has their heartbeat
    /// refreshed, so repeated calls leave exactly one entry.
    pub fn join(&self, user_id: &UserId) -> Result<UserState, EngineError> {
        let now = self.ctx.now();
        let (user, joined) = self.ctx.store.transact(|tx| {
            if tx.profile(user_id).is_none() {
                return Err(EngineError::UnknownUser(user_id.clone()));
            }
            let mut user = tx
                .user(user_id)
                .cloned()
                .unwrap_or_else(|| UserState::new(user_id.clone(), now));

            if let Some(match_id) = user.match_id {
                if user.state.is_matched() && tx.get_match(&match_id).is_some_and(Match::is_active)
                {
                    return Err(EngineError::AlreadyMatched {
                        user_id: user_id.clone(),
                        match_id,
                    });
                }
            }

            let joined = user.state != UserStatus::Waiting || user.match_id.is_some();
            if joined {
                user.enter_queue(now);
            } else {
                user.last_active = now;
            }
            tx.put_user(user.clone());
            Ok((user, joined))
        })?;

        if joined {
            info!(user_id = %user_id, fairness = user.fairness, "joined queue");
            self.ctx.emit(vec![EngineEvent::QueueJoined {
                user_id: user_id.clone(),
                fairness: user.fairness,
            }]);
        } else {
            debug!(user_id = %user_id, "already waiting, join refreshed heartbeat");
        }
        Ok(user)
    }

    /// Take a waiting user out of the queue. Idle users are left alone.
    pub fn leave(&self, user_id: &UserId) -> Result<UserState, EngineError> {
        let user = self.ctx.store.transact(|tx| {
            let mut user = tx
                .user(user_id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownUser(user_id.clone()))?;
            match user.state {
                UserStatus::Waiting => {
                    user.go_idle();
                    tx.put_user(user.clone());
                }
                UserStatus::Idle => {}
                UserStatus::Paired | UserStatus::Voting => {
                    if let Some(match_id) = user.match_id {
                        return Err(EngineError::AlreadyMatched {
                            user_id: user_id.clone(),
                            match_id,
                        });
                    }
                    user.go_idle();
                    tx.put_user(user.clone());
                }
            }
            Ok(user)
        })?;
        debug!(user_id = %user_id, state = ?user.state, "left queue");
        Ok(user)
    }

    /// Live waiting users in fairness order.
    pub fn candidates(&self) -> Result<Vec<QueueEntry>, EngineError> {
        let now = self.ctx.now();
        Ok(self
            .ctx
            .store
            .queue_entries(now, self.ctx.config.liveness_window)?)
    }
}
