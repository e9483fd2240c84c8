use std::sync::Arc;
use std::time::Duration;

use super::{Lock, LockError};

/// Hands out the lock for a key (`user:<id>`, `match:<id>`). The same key
/// always maps to the same lock.
pub trait LockManager: Send + Sync {
    type Lock: Lock;

    fn get_lock(&self, key: &str) -> Result<Arc<Self::Lock>, LockError>;

    /// Force-release holds older than `max_hold`, returning their keys.
    fn release_stale(&self, max_hold: Duration) -> Result<Vec<String>, LockError>;
}
