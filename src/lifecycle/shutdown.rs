//! Shutdown coordination for detached shadow tasks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

use crate::observability::metrics;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that detached tasks subscribe to, and counts
/// tracked tasks so the owner can wait for them to drain.
#[derive(Debug)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Count a task as in flight until the returned guard drops.
    pub fn track(self: &Arc<Self>) -> TaskGuard {
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_shadow_in_flight(n);
        TaskGuard {
            owner: Arc::clone(self),
        }
    }

    /// Number of tracked tasks still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no tracked task is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one tracked task; dropping it releases the slot.
#[derive(Debug)]
pub struct TaskGuard {
    owner: Arc<Shutdown>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let remaining = self.owner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_shadow_in_flight(remaining);
        if remaining == 0 {
            self.owner.idle.notify_waiters();
        }
    }
}
