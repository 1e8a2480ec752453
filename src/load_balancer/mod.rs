//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Pool chosen by the traffic router (legacy | new)
//!     → pool.rs (instances of that pool)
//!     → weighted.rs (weighted random pick among healthy instances)
//!     → instance.rs (circuit-breaker guarded call)
//!     → Return response or error
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless apart from its random source
//! - Unhealthy instances (flag down or circuit open) excluded from selection
//! - Randomness is injected so selection can be replayed in tests

pub mod instance;
pub mod pool;
pub mod random;
pub mod weighted;

use std::sync::Arc;

use crate::load_balancer::instance::ServiceInstance;

/// Load balancing strategy over one pool.
pub trait LoadBalancer: Send + Sync {
    /// Pick a healthy instance, or `None` when the pool has none.
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>>;
}
