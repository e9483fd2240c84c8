mod clock;
mod config;
mod context;
mod engine;
mod error;
mod events;
mod guardian;
mod lock;
mod matching;
mod model;
mod pairing;
mod presence;
mod queue;
mod store;
mod voting;
mod worker;

pub use clock::{Clock, DefaultClock, ManualClock};
pub use config::{ConfigError, EngineConfig, RelaxationSchedule};
pub use engine::{Engine, EngineBuilder, StatusView, TickReport};
pub use error::{EngineError, StoreError};
#[cfg(feature = "emitter")]
pub use events::EmitterSink;
pub use events::{EngineEvent, EventEnvelope, EventSink, LogSink, NullSink, SinkError};
pub use guardian::{Correction, Guardian, SweepReport};
pub use lock::{
    acquire_blocking, try_acquire_ordered, Backoff, HoldToken, InMemoryLock, InMemoryLockManager,
    Lock, LockError, LockGuard, LockManager,
};
pub use matching::{accepts, hard_eligible, mutually_accept, Candidate, Widening};
pub use model::{
    Gender, HistoryEntry, Location, Match, MatchId, MatchStatus, Outcome, PairKey, Preferences,
    Profile, Tier, UserId, UserState, UserStatus, Vote, VoteChoice,
};
pub use presence::Disconnect;
pub use queue::{QueueEntry, QueueIndex};
pub use store::{InMemoryStore, StateStore, Tables, Transaction};
pub use voting::{disposition, resolve, Disposition, VoteReceipt};
pub use worker::{EngineWorkerThread, GuardianStats, GuardianThread, TickStats};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
