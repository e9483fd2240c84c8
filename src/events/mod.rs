//! Structured events handed to the observability sink.
//!
//! Events are emitted only after the transaction that caused them commits,
//! and a sink failure never undoes that transaction.

mod envelope;
mod sink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use envelope::EventEnvelope;
#[cfg(feature = "emitter")]
pub use sink::EmitterSink;
pub use sink::{EventSink, LogSink, NullSink, SinkError};

use crate::guardian::Correction;
use crate::model::{MatchId, Outcome, Tier, UserId, UserStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    QueueJoined {
        user_id: UserId,
        fairness: u8,
    },
    MatchCreated {
        match_id: MatchId,
        user1_id: UserId,
        user2_id: UserId,
        tier: Tier,
    },
    VotingStarted {
        match_id: MatchId,
        expires_at: DateTime<Utc>,
    },
    OutcomeResolved {
        match_id: MatchId,
        user1_id: UserId,
        user2_id: UserId,
        outcome: Outcome,
    },
    DisconnectDetected {
        user_id: UserId,
        previous: UserStatus,
    },
    GuardianCorrection(Correction),
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::QueueJoined { .. } => "queue_joined",
            EngineEvent::MatchCreated { .. } => "match_created",
            EngineEvent::VotingStarted { .. } => "voting_started",
            EngineEvent::OutcomeResolved { .. } => "outcome_resolved",
            EngineEvent::DisconnectDetected { .. } => "disconnect_detected",
            EngineEvent::GuardianCorrection(_) => "guardian_correction",
        }
    }
}
