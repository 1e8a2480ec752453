//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every routed request produces:
//!     → trace.rs (TraceContext: root span + one span per instance call)
//!     → metrics.rs (per-service counters, metrics facade)
//!     → events.rs (MigrationEvent to tracing and channel subscribers)
//!
//! Consumers:
//!     → get_traces() / get_metrics() snapshots
//!     → Metrics endpoint (Prometheus scrape)
//!     → Log output (logging.rs)
//! ```
//!
//! # Design Decisions
//! - Request traces are in-process values, independent of the log subscriber
//! - Metrics are cheap (atomic increments)
//! - Events are pushed through an explicit sink, never inherited

pub mod events;
pub mod logging;
pub mod metrics;
pub mod trace;
