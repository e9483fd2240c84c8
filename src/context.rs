use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventEnvelope, EventSink};
use crate::lock::{self, InMemoryLock, InMemoryLockManager, LockError, LockGuard};
use crate::model::MatchId;

/// Handles shared by every engine component.
pub(crate) struct Context<S> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub config: Arc<EngineConfig>,
    pub sink: Arc<dyn EventSink>,
    pub locks: Arc<InMemoryLockManager>,
}

impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            sink: self.sink.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S> Context<S> {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    /// Blocking hold on a match's vote critical section.
    pub fn lock_match(&self, match_id: &MatchId) -> Result<LockGuard<InMemoryLock>, LockError> {
        lock::acquire_blocking(&*self.locks, &lock::match_key(&match_id.to_string()))
    }

    /// Hand committed events to the sink. Failures are logged and dropped.
    pub fn emit(&self, events: Vec<EngineEvent>) {
        let now = self.now();
        for event in events {
            let published = EventEnvelope::encode(&event, now)
                .and_then(|envelope| self.sink.publish(&envelope));
            if let Err(err) = published {
                warn!(event_type = event.event_type(), error = %err, "event sink rejected event");
            }
        }
    }
}
