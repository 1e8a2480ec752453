//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Keep per-service request counters for `get_metrics()` snapshots
//! - Mirror every update into the `metrics` facade
//! - Expose a Prometheus-compatible endpoint when enabled
//!
//! # Metrics
//! - `migration_requests_total` (counter): primary requests by service, pool
//! - `migration_errors_total` (counter): primary errors by service, kind
//! - `migration_shadow_requests_total` (counter): shadow calls by service, outcome
//! - `migration_request_duration_seconds` (histogram): primary latency
//! - `migration_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `migration_circuit_rejections_total` (counter): calls refused by a breaker
//!
//! # Design Decisions
//! - Counters are plain atomics; counts only increase
//! - Average latency is a running mean derived from a microsecond sum
//! - Snapshots read each counter independently (no cross-counter consistency)

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

use crate::load_balancer::pool::Pool;
use crate::resilience::circuit_breaker::CircuitState;

/// Counters of one registered service.
#[derive(Debug)]
pub struct ServiceMetrics {
    service: String,
    total_requests: AtomicU64,
    legacy_requests: AtomicU64,
    new_requests: AtomicU64,
    shadow_requests: AtomicU64,
    shadow_errors: AtomicU64,
    errors: AtomicU64,
    response_time_us: AtomicU64,
    timed_requests: AtomicU64,
}

/// Read-only view of a service's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub legacy_requests: u64,
    pub new_requests: u64,
    pub shadow_requests: u64,
    pub shadow_errors: u64,
    pub errors: u64,
    pub avg_response_time_ms: f64,
    /// Share of primary traffic served by the new pool, in percent.
    pub new_traffic_percent: f64,
}

impl ServiceMetrics {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            total_requests: AtomicU64::new(0),
            legacy_requests: AtomicU64::new(0),
            new_requests: AtomicU64::new(0),
            shadow_requests: AtomicU64::new(0),
            shadow_errors: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            response_time_us: AtomicU64::new(0),
            timed_requests: AtomicU64::new(0),
        }
    }

    /// Count an inbound request before routing.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed primary call.
    pub fn record_primary(&self, pool: Pool, elapsed: Duration) {
        match pool {
            Pool::Legacy => self.legacy_requests.fetch_add(1, Ordering::Relaxed),
            Pool::New => self.new_requests.fetch_add(1, Ordering::Relaxed),
        };
        self.response_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.timed_requests.fetch_add(1, Ordering::Relaxed);

        counter!("migration_requests_total", "service" => self.service.clone(), "pool" => pool.as_str())
            .increment(1);
        histogram!("migration_request_duration_seconds", "service" => self.service.clone())
            .record(elapsed.as_secs_f64());
    }

    /// Record a primary-path error (routing or call).
    pub fn record_error(&self, kind: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!("migration_errors_total", "service" => self.service.clone(), "kind" => kind).increment(1);
    }

    /// Record a finished shadow call.
    pub fn record_shadow(&self, success: bool) {
        self.shadow_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.shadow_errors.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = if success { "success" } else { "error" };
        counter!("migration_shadow_requests_total", "service" => self.service.clone(), "outcome" => outcome)
            .increment(1);
    }

    /// Record a shadow copy that could not be dispatched.
    pub fn record_shadow_skipped(&self) {
        self.shadow_errors.fetch_add(1, Ordering::Relaxed);
        counter!("migration_shadow_requests_total", "service" => self.service.clone(), "outcome" => "skipped")
            .increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let legacy = self.legacy_requests.load(Ordering::Relaxed);
        let new = self.new_requests.load(Ordering::Relaxed);
        let timed = self.timed_requests.load(Ordering::Relaxed);
        let avg_response_time_ms = if timed == 0 {
            0.0
        } else {
            self.response_time_us.load(Ordering::Relaxed) as f64 / timed as f64 / 1000.0
        };
        let new_traffic_percent = if legacy + new == 0 {
            0.0
        } else {
            new as f64 * 100.0 / (legacy + new) as f64
        };

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            legacy_requests: legacy,
            new_requests: new,
            shadow_requests: self.shadow_requests.load(Ordering::Relaxed),
            shadow_errors: self.shadow_errors.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            avg_response_time_ms,
            new_traffic_percent,
        }
    }
}

/// Publish a breaker's state as a gauge.
pub fn record_circuit_state(breaker: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("migration_circuit_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_circuit_rejection(breaker: &str) {
    counter!("migration_circuit_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_shadow_in_flight(count: usize) {
    gauge!("migration_shadow_in_flight").set(count as f64);
}

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
