//! Engine integration tests.
//!
//! Drives the public `Engine` API on a manual clock:
//! - Queue joins, leaves and liveness filtering
//! - Tiered matching and atomic pairing
//! - Voting outcomes and their effects on both users
//! - Heartbeats and disconnect handling
//! - Concurrent spins, pairings and votes
//! - Snapshot and restore with matches in flight

#[path = "../support/mod.rs"]
mod support;

mod concurrency;
mod voting;
