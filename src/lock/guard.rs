use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::{Backoff, HoldToken, Lock, LockError, LockManager};

/// Releases its hold when dropped. A hold that was force-released in the
/// meantime is left alone.
pub struct LockGuard<L: Lock> {
    key: String,
    lock: Arc<L>,
    token: HoldToken,
}

impl<L: Lock> LockGuard<L> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> HoldToken {
        self.token
    }
}

impl<L: Lock> Drop for LockGuard<L> {
    fn drop(&mut self) {
        match self.lock.unlock(self.token) {
            Ok(true) => {}
            Ok(false) => debug!(key = %self.key, "hold was already force-released"),
            Err(err) => warn!(key = %self.key, error = %err, "failed to release lock"),
        }
    }
}

/// Acquire a single lock, blocking until it is available.
pub fn acquire_blocking<M: LockManager>(
    manager: &M,
    key: &str,
) -> Result<LockGuard<M::Lock>, LockError> {
    let lock = manager.get_lock(key)?;
    let token = lock.lock()?;
    Ok(LockGuard {
        key: key.to_string(),
        lock,
        token,
    })
}

/// Try to take every key in canonical order.
///
/// Keys are sorted and deduplicated first, so two callers racing for
/// overlapping sets always contend on the lowest shared key and can never
/// form a wait cycle. If any key is busy, everything taken so far is released
/// and the whole set is retried after a backoff delay. Returns `Ok(None)` once
/// the retries are exhausted.
pub fn try_acquire_ordered<M: LockManager>(
    manager: &M,
    keys: &[&str],
    backoff: &Backoff,
) -> Result<Option<Vec<LockGuard<M::Lock>>>, LockError> {
    let mut ordered: Vec<&str> = keys.to_vec();
    ordered.sort_unstable();
    ordered.dedup();

    for attempt in 0..=backoff.max_retries() {
        if let Some(guards) = try_acquire_all(manager, &ordered)? {
            return Ok(Some(guards));
        }
        if attempt < backoff.max_retries() {
            let delay = backoff.delay(attempt);
            debug!(keys = ?ordered, attempt, ?delay, "lock contended, backing off");
            thread::sleep(delay);
        }
    }

    debug!(keys = ?ordered, "giving up after lock contention");
    Ok(None)
}

fn try_acquire_all<M: LockManager>(
    manager: &M,
    ordered: &[&str],
) -> Result<Option<Vec<LockGuard<M::Lock>>>, LockError> {
    let mut guards = Vec::with_capacity(ordered.len());
    for key in ordered {
        let lock = manager.get_lock(key)?;
        let Some(token) = lock.try_lock()? else {
            // dropping `guards` releases what was taken
            return Ok(None);
        };
        guards.push(LockGuard {
            key: key.to_string(),
            lock,
            token,
        });
    }
    Ok(Some(guards))
}
