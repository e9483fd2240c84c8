use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{EngineEvent, SinkError};

/// An event as delivered to a sink: id, type, timestamp and a bitcode payload.
#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl EventEnvelope {
    pub fn encode(event: &EngineEvent, occurred_at: DateTime<Utc>) -> Result<Self, SinkError> {
        let payload =
            bitcode::serialize(event).map_err(|e| SinkError::Encoding(e.to_string()))?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_type: event.event_type().to_string(),
            occurred_at,
            payload,
        })
    }

    pub fn decode(&self) -> Result<EngineEvent, SinkError> {
        bitcode::deserialize(&self.payload).map_err(|e| SinkError::Encoding(e.to_string()))
    }

    /// The payload re-rendered as JSON, for text sinks.
    pub fn to_json(&self) -> Result<String, SinkError> {
        let event = self.decode()?;
        serde_json::to_string(&event).map_err(|e| SinkError::Encoding(e.to_string()))
    }
}
