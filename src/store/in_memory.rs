use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::tables::{Tables, Transaction};
use super::StateStore;
use crate::error::StoreError;
use crate::model::{HistoryEntry, Match, Profile, UserState, Vote};

/// In-memory store backed by `Arc<RwLock<Tables>>`.
///
/// Clone-friendly: clones share the same tables. Transactions hold the write
/// lock from first read to commit, so they are serializable.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    users: Vec<UserState>,
    profiles: Vec<Profile>,
    matches: Vec<Match>,
    votes: Vec<Vote>,
    history: Vec<HistoryEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize every table with bitcode.
    pub fn snapshot(&self) -> Result<Vec<u8>, StoreError> {
        let snapshot = self.read(|tables| StoreSnapshot {
            users: tables.users().cloned().collect(),
            profiles: tables.profiles().cloned().collect(),
            matches: tables.matches().cloned().collect(),
            votes: tables.votes().cloned().collect(),
            history: tables.history().cloned().collect(),
        })?;
        bitcode::serialize(&snapshot).map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    /// Rebuild a store, indexes included, from `snapshot` output.
    pub fn restore(bytes: &[u8]) -> Result<Self, StoreError> {
        let snapshot: StoreSnapshot =
            bitcode::deserialize(bytes).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        let tables = Tables::load(
            snapshot.users,
            snapshot.profiles,
            snapshot.matches,
            snapshot.votes,
            snapshot.history,
        );
        Ok(Self {
            tables: Arc::new(RwLock::new(tables)),
        })
    }
}

impl StateStore for InMemoryStore {
    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("transact"))?;
        let (value, staged) = {
            let mut tx = Transaction::new(&tables);
            let value = f(&mut tx)?;
            (value, tx.into_staged())
        };
        tables.apply(staged)?;
        Ok(value)
    }

    fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Tables) -> T,
    {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(f(&tables))
    }
}
