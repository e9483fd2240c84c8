//! Background threads.
//!
//! - `EngineWorkerThread` - periodic `Engine::tick`
//! - `GuardianThread` - periodic guardian sweep
//!
//! Both stop when `stop()` is called or when dropped, and return their
//! counters from `stop()`.

mod thread;

pub use thread::{EngineWorkerThread, GuardianStats, GuardianThread, TickStats};
