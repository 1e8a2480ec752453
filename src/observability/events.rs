//! Migration event notifications.
//!
//! Components hold an explicit `Arc<dyn EventSink>` instead of broadcasting
//! to implicit listeners. The orchestrator fans events out to a tracing sink
//! and to any channel subscribers.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::load_balancer::pool::Pool;
use crate::resilience::circuit_breaker::CircuitState;
use crate::routing::strategy::TrafficStrategy;

/// Something observable happened inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    CircuitStateChanged {
        breaker: String,
        from: CircuitState,
        to: CircuitState,
    },
    RequestCompleted {
        service: String,
        pool: Pool,
        instance: String,
        #[serde(with = "duration_ms")]
        duration: Duration,
        success: bool,
    },
    ShadowCompleted {
        service: String,
        instance: Option<String>,
        success: bool,
    },
    StrategyUpdated {
        service: String,
        strategy: TrafficStrategy,
    },
}

/// Receiver of migration events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MigrationEvent);
}

/// Writes every event as a structured log line.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: MigrationEvent) {
        match &event {
            MigrationEvent::CircuitStateChanged { breaker, from, to } => {
                tracing::info!(breaker = %breaker, from = ?from, to = ?to, "Circuit state changed");
            }
            MigrationEvent::RequestCompleted { service, pool, instance, duration, success } => {
                tracing::debug!(
                    service = %service,
                    pool = %pool,
                    instance = %instance,
                    duration_ms = duration.as_millis() as u64,
                    success,
                    "Request completed"
                );
            }
            MigrationEvent::ShadowCompleted { service, instance, success } => {
                tracing::debug!(service = %service, instance = ?instance, success, "Shadow request completed");
            }
            MigrationEvent::StrategyUpdated { service, strategy } => {
                tracing::info!(service = %service, strategy = ?strategy, "Traffic strategy updated");
            }
        }
    }
}

/// Fans events out to tracing and to every live channel subscriber.
#[derive(Default)]
pub struct EventBus {
    log: TracingSink,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MigrationEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Events emitted before this call are not replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MigrationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: MigrationEvent) {
        self.log.emit(event.clone());
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers are pruned lazily.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Discards everything. Used by standalone components in tests.
#[derive(Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: MigrationEvent) {}
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }
}
