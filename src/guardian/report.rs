use serde::{Deserialize, Serialize};

use crate::model::{MatchId, Outcome, UserId, UserStatus};

/// One repair made by a guardian sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    OfflinePairBroken {
        match_id: MatchId,
        offline: Vec<UserId>,
        outcome: Outcome,
    },
    DuplicateMatchCancelled {
        match_id: MatchId,
        user_id: UserId,
        kept: MatchId,
    },
    StateRealigned {
        user_id: UserId,
        before: UserStatus,
        after: UserStatus,
    },
    DanglingMatchCleared {
        user_id: UserId,
        match_id: MatchId,
    },
    ExpiredVoteResolved {
        match_id: MatchId,
        outcome: Outcome,
    },
    UnreadyMatchCancelled {
        match_id: MatchId,
    },
    StarvationBoost {
        user_id: UserId,
        before: u8,
        after: u8,
    },
    ForcedMatch {
        user_id: UserId,
        match_id: MatchId,
    },
    StaleLockReleased {
        key: String,
    },
}

impl Correction {
    pub fn kind(&self) -> &'static str {
        match self {
            Correction::OfflinePairBroken { .. } => "offline_pair_broken",
            Correction::DuplicateMatchCancelled { .. } => "duplicate_match_cancelled",
            Correction::StateRealigned { .. } => "state_realigned",
            Correction::DanglingMatchCleared { .. } => "dangling_match_cleared",
            Correction::ExpiredVoteResolved { .. } => "expired_vote_resolved",
            Correction::UnreadyMatchCancelled { .. } => "unready_match_cancelled",
            Correction::StarvationBoost { .. } => "starvation_boost",
            Correction::ForcedMatch { .. } => "forced_match",
            Correction::StaleLockReleased { .. } => "stale_lock_released",
        }
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Another sweep was already running, so this one did nothing.
    pub skipped: bool,
    pub corrections: Vec<Correction>,
}

impl SweepReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            corrections: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.corrections.iter().filter(|c| c.kind() == kind).count()
    }
}
