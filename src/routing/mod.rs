//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (subject ids, headers, region) + RoutingContext
//!     → router.rs (load strategy + rules snapshot, merge per-call context)
//!     → matcher.rs (decide legacy | new for the strategy)
//!     → load_balancer (weighted pick within the chosen pool)
//!     → Return: RouteDecision (single instance, or primary + shadow)
//! ```
//!
//! # Design Decisions
//! - One router per migrating service
//! - Strategy changes are atomic swaps, applied from the next call
//! - Deterministic strategies (blue-green, A/B, header, geo, percentage) never
//!   consult the random source
//! - Unrecognized or missing routing attributes fall back to legacy

pub mod matcher;
pub mod request;
pub mod router;
pub mod strategy;

pub use request::{Request, Response, RoutingContext};
pub use router::{RouteDecision, TrafficRouter};
pub use strategy::{RouterState, RoutingRules, RuleOverrides, TrafficStrategy};
