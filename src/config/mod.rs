//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MigrationConfig (validated, immutable)
//!     → MigrationOrchestrator::from_config registers services
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → MigrationOrchestrator::apply_config swaps strategies and rules
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Hot reload only changes routing; instance pools are fixed at registration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{InstanceConfig, MigrationConfig, ObservabilityConfig, ServiceConfig, ShadowConfig};
