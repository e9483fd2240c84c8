use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{HistoryEntry, Match, MatchId, PairKey, Profile, UserId, UserState, Vote};
use crate::queue::{QueueEntry, QueueIndex};

/// Committed state: the four record tables plus the indexes kept over them.
#[derive(Debug, Default)]
pub struct Tables {
    users: HashMap<UserId, UserState>,
    profiles: HashMap<UserId, Profile>,
    matches: HashMap<MatchId, Match>,
    votes: HashMap<MatchId, Vote>,
    history: HashMap<PairKey, HistoryEntry>,
    active_pairs: HashMap<PairKey, MatchId>,
    queue: QueueIndex,
}

impl Tables {
    pub fn user(&self, user_id: &UserId) -> Option<&UserState> {
        self.users.get(user_id)
    }

    pub fn profile(&self, user_id: &UserId) -> Option<&Profile> {
        self.profiles.get(user_id)
    }

    pub fn get_match(&self, match_id: &MatchId) -> Option<&Match> {
        self.matches.get(match_id)
    }

    pub fn vote(&self, match_id: &MatchId) -> Option<&Vote> {
        self.votes.get(match_id)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserState> {
        self.users.values()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.matches.values()
    }

    pub fn votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.values()
    }

    pub fn active_matches(&self) -> impl Iterator<Item = &Match> {
        self.matches.values().filter(|m| m.is_active())
    }

    pub fn active_match_for_pair(&self, pair: &PairKey) -> Option<&Match> {
        self.active_pairs
            .get(pair)
            .and_then(|id| self.matches.get(id))
            .filter(|m| m.is_active())
    }

    pub fn in_history(&self, pair: &PairKey) -> bool {
        self.history.contains_key(pair)
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.values()
    }

    pub fn queue(&self) -> &QueueIndex {
        &self.queue
    }

    /// Waiting users whose heartbeat is inside the liveness window, in
    /// fairness order.
    pub fn queue_entries(&self, now: DateTime<Utc>, window: Duration) -> Vec<QueueEntry> {
        self.queue
            .iter()
            .filter_map(|id| self.users.get(id))
            .filter(|user| user.is_live(now, window))
            .map(|user| QueueEntry {
                user_id: user.user_id.clone(),
                fairness: user.fairness,
                waiting_since: user.waiting_since,
                last_active: user.last_active,
            })
            .collect()
    }

    pub(crate) fn load(
        users: Vec<UserState>,
        profiles: Vec<Profile>,
        matches: Vec<Match>,
        votes: Vec<Vote>,
        history: Vec<HistoryEntry>,
    ) -> Self {
        let mut tables = Tables::default();
        for user in users {
            tables.queue.sync(&user);
            tables.users.insert(user.user_id.clone(), user);
        }
        for profile in profiles {
            tables.profiles.insert(profile.user_id.clone(), profile);
        }
        for m in matches {
            if m.is_active() {
                tables.active_pairs.insert(m.pair(), m.match_id);
            }
            tables.matches.insert(m.match_id, m);
        }
        for vote in votes {
            tables.votes.insert(vote.match_id, vote);
        }
        for entry in history {
            tables.history.insert(entry.pair.clone(), entry);
        }
        tables
    }

    /// Apply staged writes. Validation runs first so a rejected change set
    /// leaves the tables untouched.
    pub(crate) fn apply(&mut self, staged: Staged) -> Result<(), StoreError> {
        self.check_active_pairs(&staged)?;

        for (id, m) in staged.matches {
            let pair = m.pair();
            if m.is_active() {
                self.active_pairs.insert(pair, id);
            } else if self.active_pairs.get(&pair) == Some(&id) {
                self.active_pairs.remove(&pair);
            }
            self.matches.insert(id, m);
        }
        for (id, vote) in staged.votes {
            self.votes.insert(id, vote);
        }
        for entry in staged.history {
            self.history.entry(entry.pair.clone()).or_insert(entry);
        }
        for (id, profile) in staged.profiles {
            self.profiles.insert(id, profile);
        }
        for (id, user) in staged.users {
            self.queue.sync(&user);
            self.users.insert(id, user);
        }
        Ok(())
    }

    fn check_active_pairs(&self, staged: &Staged) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for m in staged.matches.values().filter(|m| m.is_active()) {
            let pair = m.pair();
            if !seen.insert(pair.clone()) {
                return Err(StoreError::DuplicateActivePair(pair));
            }
            if let Some(existing) = self.active_pairs.get(&pair) {
                let still_active = staged
                    .matches
                    .get(existing)
                    .map_or(true, |staged_existing| staged_existing.is_active());
                if *existing != m.match_id && still_active {
                    return Err(StoreError::DuplicateActivePair(pair));
                }
            }
        }
        Ok(())
    }
}

/// Writes buffered by a transaction until commit.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    users: HashMap<UserId, UserState>,
    profiles: HashMap<UserId, Profile>,
    matches: HashMap<MatchId, Match>,
    votes: HashMap<MatchId, Vote>,
    history: Vec<HistoryEntry>,
}

/// A unit of work over the tables.
///
/// Reads see committed state overlaid with this transaction's own writes.
/// Nothing becomes visible to other readers until the closure passed to
/// `StateStore::transact` returns `Ok`; an `Err` discards every write.
pub struct Transaction<'a> {
    base: &'a Tables,
    staged: Staged,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(base: &'a Tables) -> Self {
        Self {
            base,
            staged: Staged::default(),
        }
    }

    pub(crate) fn into_staged(self) -> Staged {
        self.staged
    }

    /// Committed state, without this transaction's writes.
    pub fn committed(&self) -> &Tables {
        self.base
    }

    pub fn user(&self, user_id: &UserId) -> Option<&UserState> {
        self.staged
            .users
            .get(user_id)
            .or_else(|| self.base.user(user_id))
    }

    pub fn put_user(&mut self, user: UserState) {
        self.staged.users.insert(user.user_id.clone(), user);
    }

    pub fn profile(&self, user_id: &UserId) -> Option<&Profile> {
        self.staged
            .profiles
            .get(user_id)
            .or_else(|| self.base.profile(user_id))
    }

    pub fn put_profile(&mut self, profile: Profile) {
        self.staged
            .profiles
            .insert(profile.user_id.clone(), profile);
    }

    pub fn get_match(&self, match_id: &MatchId) -> Option<&Match> {
        self.staged
            .matches
            .get(match_id)
            .or_else(|| self.base.get_match(match_id))
    }

    pub fn put_match(&mut self, m: Match) {
        self.staged.matches.insert(m.match_id, m);
    }

    pub fn vote(&self, match_id: &MatchId) -> Option<&Vote> {
        self.staged
            .votes
            .get(match_id)
            .or_else(|| self.base.vote(match_id))
    }

    pub fn put_vote(&mut self, vote: Vote) {
        self.staged.votes.insert(vote.match_id, vote);
    }

    pub fn active_match_for_pair(&self, pair: &PairKey) -> Option<MatchId> {
        if let Some(m) = self
            .staged
            .matches
            .values()
            .find(|m| m.is_active() && &m.pair() == pair)
        {
            return Some(m.match_id);
        }
        self.base
            .active_match_for_pair(pair)
            .map(|m| m.match_id)
            .filter(|id| self.get_match(id).is_some_and(Match::is_active))
    }

    pub fn in_history(&self, pair: &PairKey) -> bool {
        self.base.in_history(pair) || self.staged.history.iter().any(|e| &e.pair == pair)
    }

    /// Append to the pair ledger. A pair already present keeps its first entry.
    pub fn record_history(&mut self, entry: HistoryEntry) {
        if !self.in_history(&entry.pair) {
            self.staged.history.push(entry);
        }
    }
}
