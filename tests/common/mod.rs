//! Shared utilities for integration and load testing.

use std::sync::Arc;
use std::time::Duration;

use strangler_router::resilience::circuit_breaker::BreakerConfig;
use strangler_router::routing::request::SERVED_BY_HEADER;
use strangler_router::transport::SimulatedTransport;
use strangler_router::{InstanceSpec, Response, ServiceSpec, TrafficStrategy};

/// Handles on the simulated backends of a test service.
pub struct Backends {
    pub legacy: Arc<SimulatedTransport>,
    pub new: Arc<SimulatedTransport>,
}

/// A service with one legacy instance (weight 2) and one new instance (weight 1).
pub fn service(strategy: TrafficStrategy) -> (ServiceSpec, Backends) {
    service_with_latency(strategy, Duration::ZERO, Duration::ZERO)
}

/// Like `service`, with fixed backend latencies.
#[allow(dead_code)]
pub fn service_with_latency(strategy: TrafficStrategy, legacy: Duration, new: Duration) -> (ServiceSpec, Backends) {
    let backends = Backends {
        legacy: Arc::new(SimulatedTransport::new(legacy, 0.0)),
        new: Arc::new(SimulatedTransport::new(new, 0.0)),
    };
    let spec = ServiceSpec::new(strategy)
        .legacy(InstanceSpec::new("legacy-auth:8080", "1.4.2", backends.legacy.clone()).with_weight(2))
        .new_instance(InstanceSpec::new("auth-v2:8080", "2.0.0", backends.new.clone()));
    (spec, backends)
}

/// Breaker that opens after two failures and probes once after `reset_ms`.
#[allow(dead_code)]
pub fn fast_breaker(reset_ms: u64) -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 2,
        reset_timeout_ms: reset_ms,
        half_open_probe_count: 1,
    }
}

/// Instance id that served `response`.
pub fn served_by(response: &Response) -> &str {
    response.header(SERVED_BY_HEADER).unwrap_or_default()
}

/// Whether `response` came from the new pool.
#[allow(dead_code)]
pub fn from_new_pool(response: &Response) -> bool {
    served_by(response).contains("-new-")
}
