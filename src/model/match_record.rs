use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MatchId, PairKey, UserId, UserStatus};

/// Which search tier produced a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Exact,
    Expanded,
    Guaranteed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Created, waiting for both sides to acknowledge.
    Paired,
    /// Vote window open.
    Voting,
    Completed,
    Cancelled,
}

/// Terminal result of a match.
///
/// Every outcome except `Cancelled` is written to the pair-history ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    BothYes,
    YesPass,
    PassPass,
    PassIdle,
    YesIdle,
    IdleIdle,
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::BothYes => "both_yes",
            Outcome::YesPass => "yes_pass",
            Outcome::PassPass => "pass_pass",
            Outcome::PassIdle => "pass_idle",
            Outcome::YesIdle => "yes_idle",
            Outcome::IdleIdle => "idle_idle",
            Outcome::Cancelled => "cancelled",
        }
    }

    pub fn is_recorded_in_history(self) -> bool {
        self != Outcome::Cancelled
    }
}

/// One pairing attempt. Users are stored in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub status: MatchStatus,
    pub outcome: Option<Outcome>,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub vote_window_expires_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn new(a: &UserId, b: &UserId, tier: Tier, now: DateTime<Utc>) -> Self {
        let pair = PairKey::new(a, b);
        Self {
            match_id: MatchId::new(),
            user1_id: pair.low().clone(),
            user2_id: pair.high().clone(),
            status: MatchStatus::Paired,
            outcome: None,
            tier,
            created_at: now,
            vote_window_expires_at: None,
            resolved_at: None,
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.user1_id, &self.user2_id)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, MatchStatus::Paired | MatchStatus::Voting)
    }

    pub fn involves(&self, user_id: &UserId) -> bool {
        &self.user1_id == user_id || &self.user2_id == user_id
    }

    pub fn partner_of(&self, user_id: &UserId) -> Option<&UserId> {
        if &self.user1_id == user_id {
            Some(&self.user2_id)
        } else if &self.user2_id == user_id {
            Some(&self.user1_id)
        } else {
            None
        }
    }

    pub fn participants(&self) -> [&UserId; 2] {
        [&self.user1_id, &self.user2_id]
    }

    /// The user state a participant of this match should be in.
    pub fn member_status(&self) -> Option<UserStatus> {
        match self.status {
            MatchStatus::Paired => Some(UserStatus::Paired),
            MatchStatus::Voting => Some(UserStatus::Voting),
            MatchStatus::Completed | MatchStatus::Cancelled => None,
        }
    }

    /// True once the vote deadline has been reached. A vote landing exactly on
    /// the deadline is rejected.
    pub fn window_closed(&self, now: DateTime<Utc>) -> bool {
        self.vote_window_expires_at
            .is_some_and(|expires_at| now >= expires_at)
    }

    pub fn finish(&mut self, outcome: Outcome, now: DateTime<Utc>) {
        self.status = if outcome == Outcome::Cancelled {
            MatchStatus::Cancelled
        } else {
            MatchStatus::Completed
        };
        self.outcome = Some(outcome);
        self.resolved_at = Some(now);
    }
}

/// A row in the permanent pair-history ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub pair: PairKey,
    pub match_id: MatchId,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}
