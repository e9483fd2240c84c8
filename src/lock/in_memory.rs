use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{HoldToken, Lock, LockError, LockManager};

#[derive(Debug, Default)]
struct HoldState {
    current: Option<(HoldToken, Instant)>,
    issued: u64,
}

impl HoldState {
    fn grant(&mut self) -> HoldToken {
        self.issued += 1;
        let token = HoldToken(self.issued);
        self.current = Some((token, Instant::now()));
        token
    }
}

/// In-memory lock backed by `Mutex` + `Condvar`.
///
/// Each acquisition gets a fresh token and a start instant, so stale holds
/// can be detected and force-released without letting the old holder's late
/// unlock free whoever came next.
pub struct InMemoryLock {
    state: Mutex<HoldState>,
    wake: Condvar,
}

impl InMemoryLock {
    pub fn new() -> Self {
        InMemoryLock {
            state: Mutex::new(HoldState::default()),
            wake: Condvar::new(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, HoldState>, LockError> {
        self.state
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))
    }

    /// Drop the current hold if it is at least `max_hold` old.
    pub fn release_if_older(&self, max_hold: Duration) -> Result<bool, LockError> {
        let mut state = self.state()?;
        match state.current {
            Some((_, since)) if since.elapsed() >= max_hold => {
                state.current = None;
                self.wake.notify_one();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn is_held(&self) -> Result<bool, LockError> {
        Ok(self.state()?.current.is_some())
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock for InMemoryLock {
    fn lock(&self) -> Result<HoldToken, LockError> {
        let mut state = self.state()?;
        while state.current.is_some() {
            state = self
                .wake
                .wait(state)
                .map_err(|e| LockError::Poisoned(e.to_string()))?;
        }
        Ok(state.grant())
    }

    fn try_lock(&self) -> Result<Option<HoldToken>, LockError> {
        let mut state = self.state()?;
        if state.current.is_some() {
            Ok(None)
        } else {
            Ok(Some(state.grant()))
        }
    }

    fn unlock(&self, token: HoldToken) -> Result<bool, LockError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        match state.current {
            Some((current, _)) if current == token => {
                state.current = None;
                self.wake.notify_one();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn held_for(&self) -> Result<Option<Duration>, LockError> {
        Ok(self.state()?.current.map(|(_, since)| since.elapsed()))
    }
}

/// In-memory lock manager backed by a `HashMap<String, Arc<InMemoryLock>>`.
///
/// Lazily creates one `InMemoryLock` per key and returns the same `Arc` for
/// repeated lookups. `release_stale` also forgets keys nobody holds or
/// references, so per-match keys do not pile up.
pub struct InMemoryLockManager {
    locks: Mutex<HashMap<String, Arc<InMemoryLock>>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        InMemoryLockManager {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn locks(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<InMemoryLock>>>, LockError> {
        self.locks
            .lock()
            .map_err(|_| LockError::Poisoned("lock manager map poisoned".into()))
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> Result<usize, LockError> {
        Ok(self.locks()?.len())
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for InMemoryLockManager {
    type Lock = InMemoryLock;

    fn get_lock(&self, key: &str) -> Result<Arc<InMemoryLock>, LockError> {
        Ok(self
            .locks()?
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(InMemoryLock::new()))
            .clone())
    }

    fn release_stale(&self, max_hold: Duration) -> Result<Vec<String>, LockError> {
        let mut locks = self.locks()?;

        let mut released = Vec::new();
        for (key, lock) in locks.iter() {
            if lock.release_if_older(max_hold)? {
                released.push(key.clone());
            }
        }

        // With the map locked, a count of one means no guard or waiter can
        // reach the lock any more.
        let mut idle = Vec::new();
        for (key, lock) in locks.iter() {
            if Arc::strong_count(lock) == 1 && !lock.is_held()? {
                idle.push(key.clone());
            }
        }
        for key in idle {
            locks.remove(&key);
        }

        released.sort();
        Ok(released)
    }
}
