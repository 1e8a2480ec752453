//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     MigrationOrchestrator::shutdown
//!     → broadcast to every detached shadow task
//!     → wait for tracked tasks to drain
//! ```
//!
//! # Design Decisions
//! - Detached work is tracked, never left running unobserved
//! - Shutdown cancels shadow calls rather than waiting out their deadline

pub mod shutdown;

pub use shutdown::{Shutdown, TaskGuard};
