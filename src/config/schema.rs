//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! migration engine. All types derive Serde traits for deserialization
//! from TOML files.

use serde::{Deserialize, Serialize};

use crate::resilience::circuit_breaker::BreakerConfig;
use crate::routing::strategy::{RoutingRules, TrafficStrategy};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Default circuit breaker thresholds for every instance.
    pub breaker: BreakerConfig,

    /// Shadow traffic settings.
    pub shadow: ShadowConfig,

    /// Number of request traces kept in memory (oldest dropped first).
    pub max_traces: usize,

    /// Seed for routing randomness. Unset means thread RNG.
    pub seed: Option<u64>,

    /// Migrating services.
    pub services: Vec<ServiceConfig>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig::default(),
            breaker: BreakerConfig::default(),
            shadow: ShadowConfig::default(),
            max_traces: 1000,
            seed: None,
            services: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Shadow traffic configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Upper bound on a shadow call's lifetime in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

/// One migrating service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name used by `route()`.
    pub name: String,

    #[serde(default)]
    pub strategy: TrafficStrategy,

    #[serde(default)]
    pub rules: RoutingRules,

    /// Per-service breaker thresholds; falls back to the root `breaker`.
    #[serde(default)]
    pub breaker: Option<BreakerConfig>,

    /// Legacy implementation instances.
    #[serde(default)]
    pub legacy: Vec<InstanceConfig>,

    /// New implementation instances.
    #[serde(default)]
    pub new: Vec<InstanceConfig>,
}

/// One backend instance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Endpoint handed to the transport (e.g., "10.0.0.5:8080").
    pub endpoint: String,

    /// Version label reported in spans and response headers.
    #[serde(default = "default_version")]
    pub version: String,

    /// Weight for weighted selection (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Simulated latency in milliseconds (demo transport only).
    #[serde(default)]
    pub latency_ms: u64,

    /// Simulated failure probability in [0, 1] (demo transport only).
    #[serde(default)]
    pub failure_rate: f64,
}

fn default_weight() -> u32 {
    1
}

fn default_version() -> String {
    "unversioned".to_string()
}
