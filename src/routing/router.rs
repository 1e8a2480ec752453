//! Per-service traffic router.
//!
//! # Responsibilities
//! - Hold the legacy and new instance pools of one migrating service
//! - Decide the pool for each request from the current strategy and rules
//! - Pick an instance within that pool by weighted random selection
//! - Swap strategy and rules atomically at runtime
//!
//! # Design Decisions
//! - Decisions are made per call from an `ArcSwap` snapshot; nothing is cached,
//!   so an update applies from the next call onward without draining
//! - Primary selection errors propagate; the shadow selection error is handed
//!   back to the caller to be recorded, never raised
//! - The random source is shared by canary draws and instance selection

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::Result;
use crate::load_balancer::instance::ServiceInstance;
use crate::load_balancer::pool::{InstancePool, Pool};
use crate::load_balancer::random::RandomSource;
use crate::load_balancer::weighted::WeightedRandom;
use crate::routing::matcher::{self, HeaderMatcher, Matcher, RegionMatcher};
use crate::routing::request::{Request, RoutingContext};
use crate::routing::strategy::{RouterState, RuleOverrides, RoutingRules, TrafficStrategy};

/// Outcome of a routing decision.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// One instance serves the request.
    Single {
        pool: Pool,
        instance: Arc<ServiceInstance>,
    },
    /// Legacy serves the request, new receives a copy whose result is discarded.
    Shadow {
        primary: Arc<ServiceInstance>,
        shadow: Result<Arc<ServiceInstance>>,
    },
}

impl RouteDecision {
    pub fn primary(&self) -> &Arc<ServiceInstance> {
        match self {
            RouteDecision::Single { instance, .. } => instance,
            RouteDecision::Shadow { primary, .. } => primary,
        }
    }
}

/// Routes requests of one service between its legacy and new pools.
pub struct TrafficRouter {
    service: String,
    state: ArcSwap<RouterState>,
    legacy: InstancePool,
    new: InstancePool,
    balancer: WeightedRandom,
    rng: Arc<dyn RandomSource>,
    /// Request counter for the percentage strategy.
    sequence: AtomicU64,
}

impl std::fmt::Debug for TrafficRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficRouter")
            .field("service", &self.service)
            .field("state", &self.state.load_full())
            .field("legacy", &self.legacy)
            .field("new", &self.new)
            .finish()
    }
}

impl TrafficRouter {
    pub fn new(
        service: impl Into<String>,
        strategy: TrafficStrategy,
        rules: RoutingRules,
        legacy: Vec<Arc<ServiceInstance>>,
        new: Vec<Arc<ServiceInstance>>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            service: service.into(),
            state: ArcSwap::from_pointee(RouterState { strategy, rules }),
            legacy: InstancePool::new(legacy),
            new: InstancePool::new(new),
            balancer: WeightedRandom::new(rng.clone()),
            rng,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current strategy and rules.
    pub fn state(&self) -> Arc<RouterState> {
        self.state.load_full()
    }

    pub fn pool(&self, pool: Pool) -> &InstancePool {
        match pool {
            Pool::Legacy => &self.legacy,
            Pool::New => &self.new,
        }
    }

    pub fn instances(&self) -> impl Iterator<Item = &Arc<ServiceInstance>> {
        self.legacy.instances().iter().chain(self.new.instances())
    }

    pub fn find_instance(&self, id: &str) -> Option<&Arc<ServiceInstance>> {
        self.legacy.find(id).or_else(|| self.new.find(id))
    }

    /// Replace the strategy and merge `overrides` into the rules, atomically.
    pub fn update(&self, strategy: TrafficStrategy, overrides: &RuleOverrides) -> Result<Arc<RouterState>> {
        overrides.validate()?;
        self.state.rcu(|current| RouterState {
            strategy,
            rules: current.rules.merged(overrides),
        });
        Ok(self.state())
    }

    /// Choose the instance(s) for `request`. Per-call overrides outside
    /// [0, 100] fail with `InvalidConfig`.
    pub fn route(&self, request: &Request, context: &RoutingContext) -> Result<RouteDecision> {
        context.overrides.validate()?;
        let state = self.state.load();
        let rules = state.rules.merged(&context.overrides);

        if state.strategy == TrafficStrategy::Shadow {
            let primary = self.select(Pool::Legacy)?;
            let shadow = self.select(Pool::New);
            return Ok(RouteDecision::Shadow { primary, shadow });
        }

        let pool = self.decide(state.strategy, &rules, request, context);
        tracing::trace!(service = %self.service, strategy = ?state.strategy, pool = %pool, "Routing decision");
        let instance = self.select(pool)?;
        Ok(RouteDecision::Single { pool, instance })
    }

    /// Pool decision for the non-shadow strategies.
    fn decide(&self, strategy: TrafficStrategy, rules: &RoutingRules, request: &Request, context: &RoutingContext) -> Pool {
        match strategy {
            TrafficStrategy::Canary => matcher::canary(self.rng.next_f64(), rules.canary_percentage),
            TrafficStrategy::BlueGreen => rules.active_version,
            TrafficStrategy::AbTest => {
                let subject = request.subject_id();
                if subject.is_none() {
                    tracing::debug!(service = %self.service, "A/B request without subject id, using legacy");
                }
                matcher::ab_test(subject, rules.test_percentage)
            }
            TrafficStrategy::Percentage => {
                let n = self.sequence.fetch_add(1, Ordering::Relaxed);
                matcher::percentage(n, rules.canary_percentage)
            }
            TrafficStrategy::HeaderBased => matcher::to_pool(HeaderMatcher.matches(request)),
            TrafficStrategy::GeoBased => {
                let region = RegionMatcher::new(&rules.enabled_regions, context.region.as_deref());
                matcher::to_pool(region.matches(request))
            }
            TrafficStrategy::Shadow => Pool::Legacy,
        }
    }

    fn select(&self, pool: Pool) -> Result<Arc<ServiceInstance>> {
        self.pool(pool).select(&self.balancer, &self.service, pool)
    }
}
