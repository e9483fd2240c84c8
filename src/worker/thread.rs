use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;
use crate::store::StateStore;

/// Counters from the engine ticker.
#[derive(Debug, Default, Clone)]
pub struct TickStats {
    pub ticks: usize,
    pub failures: usize,
    pub matches_created: usize,
    pub outcomes_resolved: usize,
    pub disconnects: usize,
}

/// Counters from the guardian loop.
#[derive(Debug, Default, Clone)]
pub struct GuardianStats {
    pub sweeps: usize,
    pub skipped: usize,
    pub failures: usize,
    pub corrections: usize,
}

/// Shared stop/join plumbing for both workers.
struct Worker<T> {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<T>>,
}

impl<T: Default + Send + 'static> Worker<T> {
    fn spawn<F>(name: &str, interval: Duration, mut step: F) -> Self
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel();
        let name = name.to_string();
        let handle = thread::spawn(move || {
            let mut stats = T::default();
            loop {
                step(&mut stats);
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            debug!(worker = %name, "worker stopped");
            stats
        });
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    fn stop(&mut self) -> T {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => T::default(),
        }
    }
}

/// A background thread that runs `Engine::tick` every `tick_interval`.
pub struct EngineWorkerThread {
    worker: Worker<TickStats>,
}

impl EngineWorkerThread {
    pub fn spawn<S>(engine: Arc<Engine<S>>) -> Self
    where
        S: StateStore + 'static,
    {
        let interval = engine.config().tick_interval;
        Self::spawn_with_interval(engine, interval)
    }

    pub fn spawn_with_interval<S>(engine: Arc<Engine<S>>, interval: Duration) -> Self
    where
        S: StateStore + 'static,
    {
        let worker = Worker::spawn("engine-ticker", interval, move |stats: &mut TickStats| {
            stats.ticks += 1;
            match engine.tick() {
                Ok(report) => {
                    stats.matches_created += report.created.len();
                    stats.outcomes_resolved += report.resolved.len();
                    stats.disconnects += report.disconnects.len();
                }
                Err(err) => {
                    stats.failures += 1;
                    error!(error = %err, "engine tick failed");
                }
            }
        });
        Self { worker }
    }

    /// Signal the ticker to stop and wait for it. Returns its counters.
    pub fn stop(mut self) -> TickStats {
        self.worker.stop()
    }

    /// Signal the ticker to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.worker.stop_tx.send(());
    }
}

impl Drop for EngineWorkerThread {
    fn drop(&mut self) {
        let _ = self.worker.stop_tx.send(());
    }
}

/// A background thread that runs a guardian sweep every `guardian_interval`.
pub struct GuardianThread {
    worker: Worker<GuardianStats>,
}

impl GuardianThread {
    pub fn spawn<S>(engine: Arc<Engine<S>>) -> Self
    where
        S: StateStore + 'static,
    {
        let interval = engine.config().guardian_interval;
        Self::spawn_with_interval(engine, interval)
    }

    pub fn spawn_with_interval<S>(engine: Arc<Engine<S>>, interval: Duration) -> Self
    where
        S: StateStore + 'static,
    {
        let worker = Worker::spawn("guardian", interval, move |stats: &mut GuardianStats| {
            stats.sweeps += 1;
            match engine.guardian().sweep() {
                Ok(report) if report.skipped => stats.skipped += 1,
                Ok(report) => stats.corrections += report.corrections.len(),
                Err(err) => {
                    stats.failures += 1;
                    error!(error = %err, "guardian sweep failed");
                }
            }
        });
        Self { worker }
    }

    pub fn stop(mut self) -> GuardianStats {
        self.worker.stop()
    }

    pub fn signal_stop(&self) {
        let _ = self.worker.stop_tx.send(());
    }
}

impl Drop for GuardianThread {
    fn drop(&mut self) {
        let _ = self.worker.stop_tx.send(());
    }
}
