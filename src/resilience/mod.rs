//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Primary call to an instance:
//!     → circuit_breaker.rs (admit, run, record outcome)
//!
//! Shadow call to an instance:
//!     → timeouts.rs (bounded lifetime, cancelled on shutdown)
//!     → circuit_breaker.rs (same per-instance breaker as primary traffic)
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents cascading failures, one breaker per instance
//! - No retry loop here; retry/backoff belongs to the caller or the transport
//! - Detached work always has a deadline

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
