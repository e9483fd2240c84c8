use serde::{Deserialize, Serialize};

use super::{Match, MatchId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    Pass,
}

/// Vote slots for one match. `None` is an unset slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub match_id: MatchId,
    pub user1_vote: Option<VoteChoice>,
    pub user2_vote: Option<VoteChoice>,
}

impl Vote {
    pub fn new(match_id: MatchId) -> Self {
        Self {
            match_id,
            user1_vote: None,
            user2_vote: None,
        }
    }

    /// Overwrite the slot belonging to `user_id`. Returns false if the user
    /// is not part of `m`.
    pub fn cast(&mut self, m: &Match, user_id: &UserId, choice: VoteChoice) -> bool {
        if &m.user1_id == user_id {
            self.user1_vote = Some(choice);
            true
        } else if &m.user2_id == user_id {
            self.user2_vote = Some(choice);
            true
        } else {
            false
        }
    }

    /// Reset the slot belonging to `user_id` to unset.
    pub fn clear(&mut self, m: &Match, user_id: &UserId) {
        if &m.user1_id == user_id {
            self.user1_vote = None;
        } else if &m.user2_id == user_id {
            self.user2_vote = None;
        }
    }

    pub fn slot_of(&self, m: &Match, user_id: &UserId) -> Option<VoteChoice> {
        if &m.user1_id == user_id {
            self.user1_vote
        } else if &m.user2_id == user_id {
            self.user2_vote
        } else {
            None
        }
    }

    pub fn both_cast(&self) -> bool {
        self.user1_vote.is_some() && self.user2_vote.is_some()
    }
}
