//! Migration orchestrator.
//!
//! # Responsibilities
//! - Register and deregister migrating services (legacy pool, new pool, router)
//! - Route a request: trace it, pick the instance(s), call, record metrics
//! - Dispatch shadow copies without blocking the caller
//! - Swap strategies at runtime, from code or from a reloaded config
//! - Expose metrics, traces, instance state and events
//!
//! # Design Decisions
//! - One explicit orchestrator value per process or test; no global state
//! - The service map is read-mostly; `route()` clones the service `Arc` out
//!   of the map before any await, so deregistration never blocks in-flight calls
//! - Primary-path errors propagate; shadow-path errors are counted, logged to
//!   the trace, and dropped
//! - Trace retention is bounded, oldest first

mod service;
mod shadow;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::schema::{InstanceConfig, MigrationConfig};
use crate::error::{MigrationError, Result};
use crate::health::HealthState;
use crate::lifecycle::Shutdown;
use crate::load_balancer::instance::InstanceSnapshot;
use crate::load_balancer::pool::Pool;
use crate::load_balancer::random::{RandomSource, SeededRandom, ThreadRandom};
use crate::observability::events::{EventBus, EventSink, MigrationEvent};
use crate::observability::metrics::MetricsSnapshot;
use crate::observability::trace::{TraceContext, TraceSummary};
use crate::resilience::circuit_breaker::BreakerConfig;
use crate::routing::request::{Request, Response, RoutingContext, TRACE_ID_HEADER};
use crate::routing::router::RouteDecision;
use crate::routing::strategy::{RouterState, RuleOverrides, TrafficStrategy};
use crate::transport::{SimulatedTransport, Transport};

use service::MigratingService;
pub use service::{InstanceSpec, ServiceSpec};

/// Engine-wide settings.
#[derive(Clone)]
pub struct OrchestratorOptions {
    /// Breaker thresholds for services registered without their own.
    pub breaker: BreakerConfig,
    /// Upper bound on a shadow call's lifetime.
    pub shadow_timeout: Duration,
    /// Number of traces kept for `get_traces()`.
    pub max_traces: usize,
    /// Random source shared by every router.
    pub rng: Arc<dyn RandomSource>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            shadow_timeout: Duration::from_secs(5),
            max_traces: 1000,
            rng: Arc::new(ThreadRandom),
        }
    }
}

impl OrchestratorOptions {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Arc::new(SeededRandom::new(seed)),
            ..Self::default()
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        let rng: Arc<dyn RandomSource> = match config.seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(ThreadRandom),
        };
        Self {
            breaker: config.breaker.clone(),
            shadow_timeout: Duration::from_millis(config.shadow.timeout_ms),
            max_traces: config.max_traces,
            rng,
        }
    }
}

/// Top-level façade over every migrating service.
pub struct MigrationOrchestrator {
    services: DashMap<String, Arc<MigratingService>>,
    traces: Mutex<VecDeque<Arc<TraceContext>>>,
    events: Arc<EventBus>,
    shutdown: Arc<Shutdown>,
    options: OrchestratorOptions,
}

impl std::fmt::Debug for MigrationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationOrchestrator")
            .field("services", &self.service_names())
            .field("shadows_in_flight", &self.shutdown.in_flight())
            .finish_non_exhaustive()
    }
}

impl Default for MigrationOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationOrchestrator {
    pub fn new() -> Self {
        Self::with_options(OrchestratorOptions::default())
    }

    pub fn with_options(options: OrchestratorOptions) -> Self {
        Self {
            services: DashMap::new(),
            traces: Mutex::new(VecDeque::new()),
            events: Arc::new(EventBus::new()),
            shutdown: Arc::new(Shutdown::new()),
            options,
        }
    }

    /// Build an orchestrator and register every configured service, using
    /// `transport` to create each instance's transport.
    pub fn from_config_with<F>(config: &MigrationConfig, transport: F) -> Result<Self>
    where
        F: Fn(&InstanceConfig) -> Arc<dyn Transport>,
    {
        let orchestrator = Self::with_options(OrchestratorOptions::from_config(config));
        for svc in &config.services {
            let to_spec = |inst: &InstanceConfig| {
                InstanceSpec::new(&inst.endpoint, &inst.version, transport(inst)).with_weight(inst.weight)
            };
            let spec = ServiceSpec {
                strategy: svc.strategy,
                rules: svc.rules.clone(),
                breaker: svc.breaker.clone(),
                legacy: svc.legacy.iter().map(to_spec).collect(),
                new: svc.new.iter().map(to_spec).collect(),
            };
            orchestrator.register_service(&svc.name, spec)?;
        }
        Ok(orchestrator)
    }

    /// Build an orchestrator whose instances are simulated from the
    /// configured latency and failure rate.
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        let rng: Arc<dyn RandomSource> = match config.seed {
            Some(seed) => Arc::new(SeededRandom::new(seed.wrapping_add(1))),
            None => Arc::new(ThreadRandom),
        };
        Self::from_config_with(config, |inst| {
            let transport: Arc<dyn Transport> = Arc::new(
                SimulatedTransport::new(Duration::from_millis(inst.latency_ms), inst.failure_rate)
                    .with_rng(rng.clone()),
            );
            transport
        })
    }

    /// Register a service. Fails if the name is taken or the rules, breaker or weights are invalid.
    pub fn register_service(&self, name: &str, spec: ServiceSpec) -> Result<()> {
        if name.trim().is_empty() {
            return Err(MigrationError::InvalidConfig("service name must not be empty".into()));
        }
        match self.services.entry(name.to_string()) {
            Entry::Occupied(_) => Err(MigrationError::DuplicateService(name.to_string())),
            Entry::Vacant(slot) => {
                let service = MigratingService::build(
                    name,
                    spec,
                    &self.options.breaker,
                    self.events.clone(),
                    self.options.rng.clone(),
                )?;
                tracing::info!(
                    service = name,
                    strategy = ?service.router.state().strategy,
                    legacy = service.router.pool(Pool::Legacy).instances().len(),
                    new = service.router.pool(Pool::New).instances().len(),
                    "Service registered"
                );
                slot.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Remove a service. Calls already routed finish on their own handle.
    pub fn deregister_service(&self, name: &str) -> Result<()> {
        match self.services.remove(name) {
            Some(_) => {
                tracing::info!(service = name, "Service deregistered");
                Ok(())
            }
            None => Err(MigrationError::UnknownService(name.to_string())),
        }
    }

    /// Route one request of `name`.
    ///
    /// Returns the primary call's response (tagged with the trace id) or its
    /// error. A shadow copy, if any, is dispatched without being awaited.
    pub async fn route(&self, name: &str, request: &Request, context: &RoutingContext) -> Result<Response> {
        let service = self.service(name)?;
        service.metrics.record_request();

        let trace = Arc::new(TraceContext::new(format!("route {name}")));
        let root = trace.root_span_id();
        trace.tag(root, "service", name);
        trace.tag(root, "path", &request.path);
        self.retain_trace(Arc::clone(&trace));

        let decision = match service.router.route(request, context) {
            Ok(decision) => decision,
            Err(err) => {
                service.metrics.record_error(err.kind());
                trace.tag(root, "outcome", "error");
                trace.log(root, err.to_string());
                trace.finish(root);
                tracing::warn!(service = name, error = %err, "Routing failed");
                return Err(err);
            }
        };

        let (pool, primary) = match decision {
            RouteDecision::Single { pool, instance } => (pool, instance),
            RouteDecision::Shadow { primary, shadow } => {
                trace.tag(root, "shadow", true);
                self.dispatch_shadow(&service, shadow, request, &trace);
                (Pool::Legacy, primary)
            }
        };
        trace.tag(root, "pool", pool);

        let started = Instant::now();
        let result = primary.call(request, &trace, root).await;
        let elapsed = started.elapsed();

        service.metrics.record_primary(pool, elapsed);
        if let Err(err) = &result {
            service.metrics.record_error(err.kind());
        }
        self.events.emit(MigrationEvent::RequestCompleted {
            service: service.name.clone(),
            pool,
            instance: primary.id().to_string(),
            duration: elapsed,
            success: result.is_ok(),
        });

        trace.tag(root, "outcome", if result.is_ok() { "success" } else { "error" });
        trace.finish(root);

        result.map(|mut response| {
            response
                .headers
                .insert(TRACE_ID_HEADER.to_string(), trace.trace_id().to_string());
            response
        })
    }

    /// Swap the strategy and merge `overrides` into the router's rules.
    /// Applies from the next routing decision onward.
    pub fn update_strategy(
        &self,
        name: &str,
        strategy: TrafficStrategy,
        overrides: &RuleOverrides,
    ) -> Result<RouterState> {
        let service = self.service(name)?;
        let state = service.router.update(strategy, overrides)?;
        self.events.emit(MigrationEvent::StrategyUpdated {
            service: name.to_string(),
            strategy,
        });
        Ok(RouterState::clone(&state))
    }

    /// Current strategy and rules of a service.
    pub fn strategy(&self, name: &str) -> Result<RouterState> {
        Ok(RouterState::clone(&self.service(name)?.router.state()))
    }

    /// Apply strategies and rules from a reloaded config to the services
    /// already registered. Returns the number of services updated.
    ///
    /// Instance pools are fixed at registration; services that are new or
    /// missing in `config` are logged and left alone.
    pub fn apply_config(&self, config: &MigrationConfig) -> Result<usize> {
        let mut applied = 0;
        for svc in &config.services {
            if !self.services.contains_key(&svc.name) {
                tracing::warn!(service = %svc.name, "Service not registered, ignoring reloaded config");
                continue;
            }
            let overrides = RuleOverrides {
                canary_percentage: Some(svc.rules.canary_percentage),
                active_version: Some(svc.rules.active_version),
                test_percentage: Some(svc.rules.test_percentage),
                enabled_regions: Some(svc.rules.enabled_regions.clone()),
            };
            self.update_strategy(&svc.name, svc.strategy, &overrides)?;
            applied += 1;
        }
        for name in self.service_names() {
            if !config.services.iter().any(|s| s.name == name) {
                tracing::warn!(service = %name, "Service missing from reloaded config, keeping it registered");
            }
        }
        Ok(applied)
    }

    pub fn get_metrics(&self, name: &str) -> Result<MetricsSnapshot> {
        Ok(self.service(name)?.metrics.snapshot())
    }

    pub fn get_all_metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics.snapshot()))
            .collect()
    }

    /// Summaries of the retained traces, oldest first.
    pub fn get_traces(&self) -> Vec<TraceSummary> {
        self.lock_traces().iter().map(|t| t.summary()).collect()
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshots of every instance of a service, legacy pool first.
    pub fn instances(&self, name: &str) -> Result<Vec<InstanceSnapshot>> {
        let service = self.service(name)?;
        Ok(service.router.instances().map(|i| i.snapshot()).collect())
    }

    /// Health prober hook. Returns the previous state.
    pub fn set_instance_health(&self, name: &str, instance: &str, state: HealthState) -> Result<HealthState> {
        let service = self.service(name)?;
        let target = service
            .router
            .find_instance(instance)
            .ok_or_else(|| MigrationError::UnknownInstance {
                service: name.to_string(),
                instance: instance.to_string(),
            })?;
        Ok(target.set_health(state))
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MigrationEvent> {
        self.events.subscribe()
    }

    /// Number of shadow calls still running.
    pub fn shadows_in_flight(&self) -> usize {
        self.shutdown.in_flight()
    }

    /// Wait for every dispatched shadow call to finish or time out.
    pub async fn wait_for_shadows(&self) {
        self.shutdown.wait_idle().await;
    }

    /// Cancel in-flight shadow calls and wait for their tasks to finish.
    /// Later shadow copies are skipped; primary routing keeps working.
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.shutdown.in_flight(), "Shutting down shadow traffic");
        self.shutdown.trigger();
        self.shutdown.wait_idle().await;
    }

    fn service(&self, name: &str) -> Result<Arc<MigratingService>> {
        self.services
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| MigrationError::UnknownService(name.to_string()))
    }

    fn retain_trace(&self, trace: Arc<TraceContext>) {
        let mut traces = self.lock_traces();
        traces.push_back(trace);
        while traces.len() > self.options.max_traces.max(1) {
            traces.pop_front();
        }
    }

    fn lock_traces(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<TraceContext>>> {
        self.traces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::strategy::RoutingRules;

    fn healthy() -> Arc<dyn Transport> {
        Arc::new(SimulatedTransport::healthy())
    }

    fn spec(strategy: TrafficStrategy) -> ServiceSpec {
        ServiceSpec::new(strategy)
            .legacy(InstanceSpec::new("legacy:80", "1.0", healthy()))
            .new_instance(InstanceSpec::new("new:80", "2.0", healthy()))
    }

    #[tokio::test]
    async fn test_route_tags_response_and_trace() {
        let orch = MigrationOrchestrator::with_options(OrchestratorOptions::seeded(7));
        orch.register_service("auth", spec(TrafficStrategy::BlueGreen)).unwrap();

        let resp = orch
            .route("auth", &Request::new("/login"), &RoutingContext::blue_green(Pool::New))
            .await
            .unwrap();
        assert_eq!(resp.header("x-served-by"), Some("auth-new-0"));

        let traces = orch.get_traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(resp.header(TRACE_ID_HEADER), Some(traces[0].trace_id.to_string().as_str()));
        assert_eq!(traces[0].spans.len(), 2);
        assert_eq!(traces[0].spans[1].parent_span_id, Some(traces[0].spans[0].span_id));
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_service() {
        let orch = MigrationOrchestrator::new();
        orch.register_service("auth", spec(TrafficStrategy::Canary)).unwrap();

        assert_eq!(
            orch.register_service("auth", spec(TrafficStrategy::Canary)),
            Err(MigrationError::DuplicateService("auth".into()))
        );
        assert_eq!(
            orch.route("billing", &Request::new("/"), &RoutingContext::default()).await,
            Err(MigrationError::UnknownService("billing".into()))
        );
        assert!(orch.get_metrics("billing").is_err());
    }

    #[test]
    fn test_invalid_rules_rejected_at_registration() {
        let orch = MigrationOrchestrator::new();
        let bad = spec(TrafficStrategy::Canary).with_rules(RoutingRules {
            canary_percentage: 120.0,
            ..RoutingRules::default()
        });
        assert!(matches!(orch.register_service("auth", bad), Err(MigrationError::InvalidConfig(_))));
        assert!(orch.service_names().is_empty());
    }

    #[tokio::test]
    async fn test_trace_retention_is_bounded() {
        let orch = MigrationOrchestrator::with_options(OrchestratorOptions {
            max_traces: 3,
            ..OrchestratorOptions::default()
        });
        orch.register_service("auth", spec(TrafficStrategy::BlueGreen)).unwrap();

        let mut ids = Vec::new();
        for _ in 0..5 {
            let resp = orch.route("auth", &Request::new("/"), &RoutingContext::default()).await.unwrap();
            ids.push(resp.header(TRACE_ID_HEADER).unwrap().to_string());
        }

        let kept: Vec<String> = orch.get_traces().iter().map(|t| t.trace_id.to_string()).collect();
        assert_eq!(kept, ids[2..]);
    }

    #[tokio::test]
    async fn test_routing_failure_counts_error() {
        let orch = MigrationOrchestrator::new();
        orch.register_service(
            "auth",
            ServiceSpec::new(TrafficStrategy::BlueGreen).legacy(InstanceSpec::new("legacy:80", "1.0", healthy())),
        )
        .unwrap();

        let err = orch
            .route("auth", &Request::new("/"), &RoutingContext::blue_green(Pool::New))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::NoHealthyInstances { pool: Pool::New, .. }));

        let m = orch.get_metrics("auth").unwrap();
        assert_eq!((m.total_requests, m.errors, m.new_requests), (1, 1, 0));
    }

    #[test]
    fn test_set_instance_health() {
        let orch = MigrationOrchestrator::new();
        orch.register_service("auth", spec(TrafficStrategy::Canary)).unwrap();

        let prev = orch.set_instance_health("auth", "auth-new-0", HealthState::Unhealthy).unwrap();
        assert_eq!(prev, HealthState::Unknown);

        let snapshots = orch.instances("auth").unwrap();
        assert_eq!(snapshots[1].health, HealthState::Unhealthy);
        assert!(matches!(
            orch.set_instance_health("auth", "auth-new-9", HealthState::Healthy),
            Err(MigrationError::UnknownInstance { .. })
        ));
    }
}
