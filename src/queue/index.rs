use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{UserId, UserState, UserStatus};

/// Sort key: fairness descending, then longest wait, then id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    fairness: Reverse<u8>,
    waiting_since: DateTime<Utc>,
    user_id: UserId,
}

impl QueueKey {
    fn of(user: &UserState) -> Self {
        Self {
            fairness: Reverse(user.fairness),
            waiting_since: user.waiting_since,
            user_id: user.user_id.clone(),
        }
    }
}

/// A waiting, reachable user as seen by the matching engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub fairness: u8,
    pub waiting_since: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Ordered index over users whose state is `waiting`.
///
/// Derived from user rows; the store re-syncs it on every committed user
/// write, so it never disagrees with the rows it indexes.
#[derive(Debug, Default)]
pub struct QueueIndex {
    ordered: BTreeSet<QueueKey>,
    keys: HashMap<UserId, QueueKey>,
}

impl QueueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, move or drop the user's entry to match its current row.
    pub fn sync(&mut self, user: &UserState) {
        self.remove(&user.user_id);
        if user.state == UserStatus::Waiting {
            let key = QueueKey::of(user);
            self.ordered.insert(key.clone());
            self.keys.insert(user.user_id.clone(), key);
        }
    }

    pub fn remove(&mut self, user_id: &UserId) {
        if let Some(key) = self.keys.remove(user_id) {
            self.ordered.remove(&key);
        }
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.keys.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Waiting users in fairness order.
    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.ordered.iter().map(|key| &key.user_id)
    }
}
