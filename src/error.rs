//! Error taxonomy for the migration engine.
//!
//! Every failure is a value returned per call; nothing here is fatal to the
//! process. Primary-path errors propagate to the caller of `route()`, shadow-path
//! errors are captured by the orchestrator and never re-thrown.

use thiserror::Error;

use crate::load_balancer::pool::Pool;

/// Error reported by a transport plug-in, surfaced verbatim to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Human readable failure description.
    pub message: String,
    /// Upstream status code, when the transport received one.
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// Errors returned by the routing engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    /// The breaker rejected the call; the downstream was not invoked.
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    /// Every instance of the selected pool is unhealthy or open.
    #[error("no healthy instances in {pool} pool of service '{service}'")]
    NoHealthyInstances { service: String, pool: Pool },

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    #[error("service '{service}' has no instance '{instance}'")]
    UnknownInstance { service: String, instance: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure returned by the transport `invoke` call.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl MigrationError {
    /// Short machine-friendly label used for metrics and span tags.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::CircuitOpen { .. } => "circuit_open",
            MigrationError::NoHealthyInstances { .. } => "no_healthy_instances",
            MigrationError::UnknownService(_) => "unknown_service",
            MigrationError::DuplicateService(_) => "duplicate_service",
            MigrationError::UnknownInstance { .. } => "unknown_instance",
            MigrationError::InvalidConfig(_) => "invalid_config",
            MigrationError::Transport(_) => "transport",
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
