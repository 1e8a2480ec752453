//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint of one pool
//! - Guard every call with the instance's own circuit breaker
//! - Record each call as a child span of the request trace
//! - Track active calls and consecutive failures for reporting
//! - Hold the health flag set by an external prober

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{MigrationError, Result};
use crate::health::{HealthFlag, HealthState};
use crate::load_balancer::pool::Pool;
use crate::observability::trace::{SpanId, TraceContext};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::routing::request::{Request, Response, SERVED_BY_HEADER, SERVICE_VERSION_HEADER};
use crate::transport::Transport;

/// A single backend instance of a migrating service.
pub struct ServiceInstance {
    id: String,
    service_name: String,
    endpoint: String,
    version: String,
    pool: Pool,
    /// Relative selection weight, always > 0.
    weight: u32,
    health: HealthFlag,
    /// Consecutive failed calls; reporting only, independent from the breaker.
    consecutive_failures: AtomicU32,
    active_calls: AtomicUsize,
    breaker: CircuitBreaker,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("pool", &self.pool)
            .field("weight", &self.weight)
            .field("health", &self.health.get())
            .field("circuit", &self.breaker.state())
            .finish()
    }
}

/// Read-only view of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSnapshot {
    pub id: String,
    pub pool: Pool,
    pub endpoint: String,
    pub version: String,
    pub weight: u32,
    pub health: HealthState,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub active_calls: usize,
}

impl ServiceInstance {
    /// Create a new instance. Fails when `weight` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        service_name: impl Into<String>,
        pool: Pool,
        endpoint: impl Into<String>,
        version: impl Into<String>,
        weight: u32,
        breaker: CircuitBreaker,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let id = id.into();
        if weight == 0 {
            return Err(MigrationError::InvalidConfig(format!(
                "instance '{id}' must have a positive weight"
            )));
        }
        Ok(Self {
            id,
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            version: version.into(),
            pool,
            weight,
            health: HealthFlag::default(),
            consecutive_failures: AtomicU32::new(0),
            active_calls: AtomicUsize::new(0),
            breaker,
            transport,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Health flag not unhealthy and circuit willing to admit a call. An open
    /// circuit whose reset timeout has elapsed counts as healthy so the next
    /// call can probe it; a half-open circuit with every probe slot taken does not.
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy() && self.breaker.is_available()
    }

    /// Override the health flag, returning the previous state.
    pub fn set_health(&self, state: HealthState) -> HealthState {
        let previous = self.health.set(state);
        if previous != state {
            tracing::info!(instance = %self.id, from = ?previous, to = ?state, "Instance health changed");
        }
        previous
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            pool: self.pool,
            endpoint: self.endpoint.clone(),
            version: self.version.clone(),
            weight: self.weight,
            health: self.health.get(),
            circuit: self.breaker.state(),
            consecutive_failures: self.consecutive_failures(),
            active_calls: self.active_calls(),
        }
    }

    /// Invoke the transport through the circuit breaker, recording a child
    /// span of `parent` in `trace`.
    pub async fn call(&self, request: &Request, trace: &TraceContext, parent: SpanId) -> Result<Response> {
        let span = trace.start_span(format!("{}.{}", self.service_name, self.pool), parent);
        trace.tag(span, "service", &self.service_name);
        trace.tag(span, "version", &self.version);
        trace.tag(span, "endpoint", &self.endpoint);
        trace.tag(span, "instance", &self.id);

        let _guard = ActiveCallGuard::new(self);
        let result = self
            .breaker
            .execute(|| async {
                self.transport
                    .invoke(&self.endpoint, request)
                    .await
                    .map_err(MigrationError::from)
            })
            .await;

        let result = match result {
            Ok(mut response) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                trace.tag(span, "outcome", "success");
                trace.tag(span, "status", response.status);
                response
                    .headers
                    .insert(SERVED_BY_HEADER.to_string(), self.id.clone());
                response
                    .headers
                    .insert(SERVICE_VERSION_HEADER.to_string(), self.version.clone());
                Ok(response)
            }
            Err(err) => {
                // Rejections never reached the instance.
                if !matches!(err, MigrationError::CircuitOpen { .. }) {
                    self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                }
                trace.tag(span, "outcome", "error");
                trace.tag(span, "error.kind", err.kind());
                trace.log(span, err.to_string());
                tracing::debug!(instance = %self.id, error = %err, "Instance call failed");
                Err(err)
            }
        };

        trace.finish(span);
        result
    }
}

/// Counts a call as active for as long as it is alive.
struct ActiveCallGuard<'a> {
    instance: &'a ServiceInstance,
}

impl<'a> ActiveCallGuard<'a> {
    fn new(instance: &'a ServiceInstance) -> Self {
        instance.active_calls.fetch_add(1, Ordering::Relaxed);
        Self { instance }
    }
}

impl Drop for ActiveCallGuard<'_> {
    fn drop(&mut self) {
        self.instance.active_calls.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::BreakerConfig;
    use crate::transport::SimulatedTransport;

    pub(crate) fn instance(id: &str, pool: Pool, weight: u32, transport: Arc<dyn Transport>) -> Arc<ServiceInstance> {
        let breaker = CircuitBreaker::standalone(
            id,
            BreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 60_000,
                half_open_probe_count: 1,
            },
        );
        Arc::new(ServiceInstance::new(id, "auth", pool, format!("{id}:80"), "v1", weight, breaker, transport).unwrap())
    }

    #[tokio::test]
    async fn test_call_tags_span_and_response() {
        let inst = instance("auth-new-0", Pool::New, 1, Arc::new(SimulatedTransport::healthy()));
        let trace = TraceContext::new("route auth");

        let resp = inst.call(&Request::new("/login"), &trace, trace.root_span_id()).await.unwrap();
        assert_eq!(resp.header(SERVED_BY_HEADER), Some("auth-new-0"));
        assert_eq!(resp.header(SERVICE_VERSION_HEADER), Some("v1"));

        let span = &trace.spans()[1];
        assert_eq!(span.name, "auth.new");
        assert_eq!(span.tags.get("outcome").map(String::as_str), Some("success"));
        assert!(span.is_closed());
        assert_eq!(inst.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_failures_open_circuit_and_mark_unhealthy() {
        let transport = Arc::new(SimulatedTransport::healthy());
        transport.set_down(true);
        let inst = instance("auth-legacy-0", Pool::Legacy, 1, transport.clone());
        let trace = TraceContext::new("route auth");
        let root = trace.root_span_id();

        for _ in 0..2 {
            assert!(matches!(
                inst.call(&Request::new("/"), &trace, root).await,
                Err(MigrationError::Transport(_))
            ));
        }
        assert!(!inst.is_healthy());
        assert_eq!(inst.consecutive_failures(), 2);

        let err = inst.call(&Request::new("/"), &trace, root).await.unwrap_err();
        assert!(matches!(err, MigrationError::CircuitOpen { .. }));
        assert_eq!(transport.calls(), 2);
        assert_eq!(inst.consecutive_failures(), 2);
    }

    #[test]
    fn test_health_flag_overrides_closed_breaker() {
        let inst = instance("auth-new-1", Pool::New, 1, Arc::new(SimulatedTransport::healthy()));
        assert!(inst.is_healthy());
        inst.set_health(HealthState::Unhealthy);
        assert_eq!(inst.breaker().state(), CircuitState::Closed);
        assert!(!inst.is_healthy());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let breaker = CircuitBreaker::standalone("x", BreakerConfig::default());
        let res = ServiceInstance::new(
            "x",
            "auth",
            Pool::New,
            "x:80",
            "v2",
            0,
            breaker,
            Arc::new(SimulatedTransport::healthy()),
        );
        assert!(matches!(res, Err(MigrationError::InvalidConfig(_))));
    }
}
