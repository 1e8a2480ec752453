//! Circuit breaker for instance protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: instance assumed down, requests fail fast
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: next call after reset_timeout (lazy, no timer)
//! Half-Open → Closed: half_open_probe_count probe successes
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - Per-instance circuit breaker (not global)
//! - Admission and outcome recording are serialized by one mutex per breaker,
//!   the downstream call itself runs outside the lock
//! - At most `half_open_probe_count` probes are admitted per half-open cycle,
//!   counting both in-flight and already-succeeded probes
//! - Outcomes are tagged with the cycle they were admitted in; late results
//!   from an earlier cycle do not move the current one
//! - A probe dropped mid-flight (timeout, shutdown) gives its slot back

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{MigrationError, Result};
use crate::observability::events::{EventSink, MigrationEvent, NoopSink};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures (net of successes) that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is admitted, in milliseconds.
    pub reset_timeout_ms: u64,
    /// Probe successes required to close a half-open circuit.
    pub half_open_probe_count: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_probe_count: 3,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    /// Bumped on every transition.
    generation: u64,
}

/// Ticket handed out on admission and returned with the outcome.
#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
    probe: bool,
}

/// Releases an unrecorded permit when the call future is dropped mid-flight.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.release(permit);
        }
    }
}

/// Point-in-time view of a breaker, for snapshots and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
}

/// Per-instance failure detector.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.snapshot().state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker that reports transitions to `events`.
    pub fn new(name: impl Into<String>, config: BreakerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                last_failure: None,
                generation: 0,
            }),
            events,
        }
    }

    /// Create a breaker with no event sink.
    pub fn standalone(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::new(name, config, Arc::new(NoopSink))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, without applying the lazy Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a call would be let through: closed, half-open with a probe
    /// slot left, or open with the reset timeout elapsed (the next call
    /// becomes a probe).
    pub fn is_available(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.has_probe_slot(&inner),
            CircuitState::Open => inner
                .last_failure
                .map_or(true, |at| at.elapsed() >= self.config.reset_timeout()),
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `CircuitOpen` without calling `op` when the circuit rejects the
    /// call; otherwise returns `op`'s result unchanged after recording it.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = PermitGuard {
            breaker: self,
            permit: Some(self.acquire()?),
        };
        let result = op().await;
        if let Some(permit) = guard.permit.take() {
            self.record(permit, result.is_ok());
        }
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> Result<Permit> {
        let mut transition = None;
        let admitted = {
            let mut inner = self.lock();

            if inner.state == CircuitState::Open {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout() {
                    transition = Some(self.transition(&mut inner, CircuitState::HalfOpen));
                }
            }

            match inner.state {
                CircuitState::Closed => Some(Permit {
                    generation: inner.generation,
                    probe: false,
                }),
                CircuitState::HalfOpen if self.has_probe_slot(&inner) => {
                    inner.half_open_in_flight += 1;
                    Some(Permit {
                        generation: inner.generation,
                        probe: true,
                    })
                }
                _ => None,
            }
        };

        if let Some(event) = transition {
            self.events.emit(event);
        }

        admitted.ok_or_else(|| {
            tracing::debug!(breaker = %self.name, "Call rejected by open circuit");
            metrics::record_circuit_rejection(&self.name);
            MigrationError::CircuitOpen {
                breaker: self.name.clone(),
            }
        })
    }

    fn has_probe_slot(&self, inner: &BreakerState) -> bool {
        inner.half_open_in_flight + inner.half_open_successes < self.config.half_open_probe_count
    }

    fn record(&self, permit: Permit, success: bool) {
        let transition = {
            let mut inner = self.lock();
            if permit.generation != inner.generation {
                // Result from a previous cycle.
                return;
            }

            match (inner.state, success) {
                (CircuitState::Closed, true) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_sub(1);
                    None
                }
                (CircuitState::Closed, false) => {
                    inner.consecutive_failures += 1;
                    tracing::debug!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Failure recorded"
                    );
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.last_failure = Some(Instant::now());
                        Some(self.transition(&mut inner, CircuitState::Open))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, true) if permit.probe => {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_probe_count {
                        Some(self.transition(&mut inner, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, false) if permit.probe => {
                    inner.last_failure = Some(Instant::now());
                    Some(self.transition(&mut inner, CircuitState::Open))
                }
                _ => None,
            }
        };

        if let Some(event) = transition {
            self.events.emit(event);
        }
    }

    /// Give back a probe slot whose call was dropped before finishing.
    fn release(&self, permit: Permit) {
        if !permit.probe {
            return;
        }
        let mut inner = self.lock();
        if inner.generation == permit.generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) -> MigrationEvent {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
        if to == CircuitState::Closed {
            inner.consecutive_failures = 0;
            inner.last_failure = None;
        }

        match to {
            CircuitState::Open => tracing::warn!(breaker = %self.name, from = ?from, "Circuit opened"),
            _ => tracing::info!(breaker = %self.name, from = ?from, to = ?to, "Circuit transition"),
        }
        metrics::record_circuit_state(&self.name, to);

        MigrationEvent::CircuitStateChanged {
            breaker: self.name.clone(),
            from,
            to,
        }
    }
}
