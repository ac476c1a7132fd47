//! Scheduler thread that keeps a mirror at the tip of its branch.
//!
//! A pass runs as soon as the thread starts and then once per interval. A
//! failed pass is logged and retried on the next tick.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::sync::{RevisionSync, Syncer};

/// Periodic driver for one [`Syncer`].
pub struct Scheduler<M> {
    syncer: Syncer<M>,
    interval: Duration,
    shutdown: Receiver<()>,
}

impl<M: RevisionSync> Scheduler<M> {
    pub fn new(syncer: Syncer<M>, interval: Duration, shutdown: Receiver<()>) -> Self {
        Self {
            syncer,
            interval,
            shutdown,
        }
    }

    /// Run passes until a shutdown message arrives or every sender is dropped.
    ///
    /// Hands the syncer back so the caller can inspect the final state.
    pub fn run(mut self) -> Syncer<M> {
        log::info!(
            "Scheduler thread started (every {}s on {})",
            self.interval.as_secs(),
            self.syncer.branch()
        );

        loop {
            self.tick();

            match self.shutdown.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Scheduler shutting down");
                    return self.syncer;
                }
            }
        }
    }

    fn tick(&mut self) {
        log::debug!("Scheduler starting sync pass");
        if let Err(e) = self.syncer.sync() {
            if e.is_transient() {
                log::warn!("Sync pass failed, retrying next tick: {}", e);
            } else {
                log::warn!("Sync pass failed ({:?}): {}", e.kind(), e);
            }
        }
    }
}

/// Handle for managing the scheduler thread.
pub struct SchedulerHandle<M> {
    thread: Option<JoinHandle<Syncer<M>>>,
    shutdown: Sender<()>,
}

impl<M: RevisionSync + Send + 'static> SchedulerHandle<M> {
    /// Spawn the scheduler thread.
    pub fn spawn(syncer: Syncer<M>, interval: Duration) -> Self {
        let (shutdown, rx) = crossbeam_channel::bounded(1);
        let scheduler = Scheduler::new(syncer, interval, rx);

        let thread = thread::Builder::new()
            .name("docmirror-scheduler".to_string())
            .spawn(move || scheduler.run())
            .expect("failed to spawn scheduler thread");

        Self {
            thread: Some(thread),
            shutdown,
        }
    }

    /// Signal shutdown and wait for the thread to exit.
    ///
    /// Returns the syncer on the first call, `None` afterwards or if the
    /// thread panicked.
    pub fn shutdown(&mut self) -> Option<Syncer<M>> {
        let _ = self.shutdown.try_send(());
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(syncer) => Some(syncer),
            Err(_) => {
                log::warn!("Scheduler thread panicked");
                None
            }
        }
    }
}

impl<M> Drop for SchedulerHandle<M> {
    fn drop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
