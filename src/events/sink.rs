use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

#[cfg(feature = "emitter")]
use event_emitter_rs::EventEmitter;

use super::EventEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("event encoding failed: {0}")]
    Encoding(String),
    #[error("sink buffer poisoned")]
    BufferPoisoned,
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for engine events (the observability subsystem).
pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: &EventEnvelope) -> Result<(), SinkError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _envelope: &EventEnvelope) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes events as `tracing` records, optionally also into a shared buffer.
#[derive(Default, Clone)]
pub struct LogSink {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogSink {
    pub fn new() -> Self {
        LogSink { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogSink {
            buffer: Some(buffer),
        }
    }
}

impl EventSink for LogSink {
    fn publish(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let json = envelope.to_json()?;
        info!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            occurred_at = %envelope.occurred_at,
            payload = %json,
            "engine event"
        );
        if let Some(buffer) = &self.buffer {
            let mut buffer = buffer.lock().map_err(|_| SinkError::BufferPoisoned)?;
            buffer.push(format!("[EVENT] {} {}", envelope.event_type, json));
        }
        Ok(())
    }
}

/// Publishes JSON payloads through an `EventEmitter` for in-process listeners.
#[cfg(feature = "emitter")]
pub struct EmitterSink {
    emitter: Mutex<EventEmitter>,
}

#[cfg(feature = "emitter")]
impl EmitterSink {
    pub fn new(emitter: EventEmitter) -> Self {
        EmitterSink {
            emitter: Mutex::new(emitter),
        }
    }
}

#[cfg(feature = "emitter")]
impl EventSink for EmitterSink {
    fn publish(&self, envelope: &EventEnvelope) -> Result<(), SinkError> {
        let json = envelope.to_json()?;
        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| SinkError::Unavailable("emitter poisoned".into()))?;
        emitter.emit(&envelope.event_type, json);
        Ok(())
    }
}
