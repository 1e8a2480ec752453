//! Strangler-fig migration router.
//!
//! Routes requests of a service being migrated between its legacy and new
//! implementation pools, with per-instance circuit breakers, weighted
//! instance selection, shadow traffic, per-request traces and per-service
//! metrics.

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod routing;
pub mod transport;

pub use config::schema::MigrationConfig;
pub use error::{MigrationError, Result, TransportError};
pub use load_balancer::pool::Pool;
pub use orchestrator::{InstanceSpec, MigrationOrchestrator, OrchestratorOptions, ServiceSpec};
pub use routing::{Request, Response, RoutingContext, RuleOverrides, TrafficStrategy};
pub use transport::Transport;
