use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::lock::LockError;
use crate::model::{MatchId, MatchStatus, PairKey, UserId};

/// Storage-level failures. Any of these aborts the transaction in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("pair {0} already has an active match")]
    DuplicateActivePair(PairKey),
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Errors returned to callers of the engine.
///
/// Validation variants leave state untouched. `Store` and `Lock` are fatal
/// for the operation that hit them and are rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("unknown match {0}")]
    UnknownMatch(MatchId),
    #[error("user {user_id} is not part of match {match_id}")]
    NotParticipant { user_id: UserId, match_id: MatchId },
    #[error("vote window for match {match_id} closed at {expired_at}")]
    ExpiredWindow {
        match_id: MatchId,
        expired_at: DateTime<Utc>,
    },
    #[error("match {match_id} is {status:?}, not accepting this operation")]
    MatchNotActive {
        match_id: MatchId,
        status: MatchStatus,
    },
    #[error("user {user_id} is already in match {match_id}")]
    AlreadyMatched { user_id: UserId, match_id: MatchId },
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
    /// A configured duration pushed a deadline past the representable range.
    #[error("deadline {after:?} after {from} is out of range")]
    DeadlineOverflow {
        from: DateTime<Utc>,
        after: Duration,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl EngineError {
    /// True for rejections caused by the caller's input rather than by the
    /// engine itself.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            EngineError::Store(_) | EngineError::Lock(_) | EngineError::DeadlineOverflow { .. }
        )
    }
}
