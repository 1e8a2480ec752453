//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! External prober (out of process or a test):
//!     → MigrationOrchestrator::set_instance_health
//!     → state.rs (HealthFlag stored on the instance)
//!
//! Request outcomes (passive):
//!     ServiceInstance::call result
//!     → consecutive failure counter (reporting only)
//! ```
//!
//! # Design Decisions
//! - The health flag is independent from the circuit breaker; either one can
//!   take an instance out of selection
//! - Unknown counts as healthy so freshly registered instances receive traffic
//! - Health state is per-instance, not per-pool

pub mod state;

pub use state::{HealthFlag, HealthState};
