//! Per-key exclusive holds.
//!
//! Pairing takes one hold per user, always in canonical (sorted) key order,
//! with try-acquire plus bounded backoff instead of blocking waits. Vote
//! recording takes a blocking hold keyed by the match so both participants'
//! votes serialize through the same critical section.

mod backoff;
mod error;
mod guard;
mod in_memory;
mod lock;
mod lock_manager;

pub use backoff::Backoff;
pub use error::LockError;
pub use guard::{acquire_blocking, try_acquire_ordered, LockGuard};
pub use in_memory::{InMemoryLock, InMemoryLockManager};
pub use lock::{HoldToken, Lock};
pub use lock_manager::LockManager;

/// Lock key for a user's state row.
pub fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Lock key for a match's vote critical section.
pub fn match_key(match_id: &str) -> String {
    format!("match:{}", match_id)
}
