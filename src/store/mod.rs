//! Transactional state store.
//!
//! `StateStore` is the seam the engine talks to; `InMemoryStore` is the
//! in-process implementation used by the engine and its tests.

mod in_memory;
mod tables;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use in_memory::InMemoryStore;
pub use tables::{Tables, Transaction};

use crate::error::StoreError;
use crate::model::{Match, MatchId, UserId, UserState};
use crate::queue::QueueEntry;

pub trait StateStore: Send + Sync {
    /// Run `f` as one atomic unit. Writes made through the transaction are
    /// applied together if `f` returns `Ok` and discarded otherwise.
    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>;

    /// Run `f` against a consistent view of committed state.
    fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Tables) -> T;

    fn user(&self, user_id: &UserId) -> Result<Option<UserState>, StoreError> {
        self.read(|tables| tables.user(user_id).cloned())
    }

    fn get_match(&self, match_id: &MatchId) -> Result<Option<Match>, StoreError> {
        self.read(|tables| tables.get_match(match_id).cloned())
    }

    fn queue_entries(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        self.read(|tables| tables.queue_entries(now, window))
    }
}
