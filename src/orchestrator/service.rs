//! Registration specs and the per-service state the orchestrator owns.

use std::sync::Arc;

use crate::error::{MigrationError, Result};
use crate::load_balancer::instance::ServiceInstance;
use crate::load_balancer::pool::Pool;
use crate::load_balancer::random::RandomSource;
use crate::observability::events::EventSink;
use crate::observability::metrics::ServiceMetrics;
use crate::resilience::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::routing::router::TrafficRouter;
use crate::routing::strategy::{RoutingRules, TrafficStrategy};
use crate::transport::Transport;

/// One backend instance to register.
#[derive(Clone)]
pub struct InstanceSpec {
    pub endpoint: String,
    pub version: String,
    pub weight: u32,
    pub transport: Arc<dyn Transport>,
}

impl InstanceSpec {
    pub fn new(endpoint: impl Into<String>, version: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            version: version.into(),
            weight: 1,
            transport,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

impl std::fmt::Debug for InstanceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSpec")
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Everything needed to register a migrating service.
#[derive(Debug, Clone, Default)]
pub struct ServiceSpec {
    pub strategy: TrafficStrategy,
    pub rules: RoutingRules,
    /// Breaker thresholds for this service's instances; `None` uses the
    /// orchestrator default.
    pub breaker: Option<BreakerConfig>,
    pub legacy: Vec<InstanceSpec>,
    pub new: Vec<InstanceSpec>,
}

impl ServiceSpec {
    pub fn new(strategy: TrafficStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_rules(mut self, rules: RoutingRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn legacy(mut self, instance: InstanceSpec) -> Self {
        self.legacy.push(instance);
        self
    }

    pub fn new_instance(mut self, instance: InstanceSpec) -> Self {
        self.new.push(instance);
        self
    }
}

/// Router and counters of one registered service.
#[derive(Debug)]
pub(crate) struct MigratingService {
    pub(crate) name: String,
    pub(crate) router: TrafficRouter,
    pub(crate) metrics: ServiceMetrics,
}

impl MigratingService {
    /// Build instances, breakers and router. Instance ids are
    /// `{service}-{pool}-{index}`.
    pub(crate) fn build(
        name: &str,
        spec: ServiceSpec,
        default_breaker: &BreakerConfig,
        events: Arc<dyn EventSink>,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        spec.rules.validate()?;
        let breaker = spec.breaker.unwrap_or_else(|| default_breaker.clone());
        if breaker.failure_threshold == 0 || breaker.half_open_probe_count == 0 {
            return Err(MigrationError::InvalidConfig(format!(
                "breaker of service '{name}' needs a positive failure threshold and probe count"
            )));
        }

        let build_pool = |pool: Pool, specs: Vec<InstanceSpec>| -> Result<Vec<Arc<ServiceInstance>>> {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, s)| {
                    let id = format!("{name}-{pool}-{i}");
                    let cb = CircuitBreaker::new(id.clone(), breaker.clone(), events.clone());
                    ServiceInstance::new(id, name, pool, s.endpoint, s.version, s.weight, cb, s.transport)
                        .map(Arc::new)
                })
                .collect()
        };
        let legacy = build_pool(Pool::Legacy, spec.legacy)?;
        let new = build_pool(Pool::New, spec.new)?;

        Ok(Self {
            name: name.to_string(),
            router: TrafficRouter::new(name, spec.strategy, spec.rules, legacy, new, rng),
            metrics: ServiceMetrics::new(name),
        })
    }
}
