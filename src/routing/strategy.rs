//! Traffic strategies and their rules.
//!
//! # Design Decisions
//! - Strategy and rules are swapped together as one value, so a routing
//!   decision never mixes an old strategy with new rules
//! - Overrides merge field by field; unset fields keep the current value
//! - Percentages are validated on the way in, not at decision time

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::load_balancer::pool::Pool;

/// How traffic is split between the legacy and new pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficStrategy {
    /// Random draw against `canary_percentage`.
    #[default]
    Canary,
    /// Everything goes to `active_version`.
    BlueGreen,
    /// Legacy serves, new receives a discarded copy.
    Shadow,
    /// Stable bucket of the subject id against `test_percentage`.
    #[serde(alias = "a_b_test")]
    AbTest,
    /// Deterministic interleaving hitting exactly `canary_percentage`.
    Percentage,
    /// `x-use-new-version` / `x-version` request headers.
    HeaderBased,
    /// Request region in `enabled_regions`.
    GeoBased,
}

/// Router-level defaults for every strategy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingRules {
    pub canary_percentage: f64,
    pub active_version: Pool,
    pub test_percentage: f64,
    pub enabled_regions: BTreeSet<String>,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            canary_percentage: 0.0,
            active_version: Pool::Legacy,
            test_percentage: 50.0,
            enabled_regions: BTreeSet::new(),
        }
    }
}

/// Partial rules; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleOverrides {
    pub canary_percentage: Option<f64>,
    pub active_version: Option<Pool>,
    pub test_percentage: Option<f64>,
    pub enabled_regions: Option<BTreeSet<String>>,
}

impl RuleOverrides {
    pub fn validate(&self) -> Result<()> {
        check_percentage("canary_percentage", self.canary_percentage)?;
        check_percentage("test_percentage", self.test_percentage)
    }
}

impl RoutingRules {
    pub fn validate(&self) -> Result<()> {
        check_percentage("canary_percentage", Some(self.canary_percentage))?;
        check_percentage("test_percentage", Some(self.test_percentage))
    }

    /// Copy of these rules with `overrides` applied.
    pub fn merged(&self, overrides: &RuleOverrides) -> RoutingRules {
        RoutingRules {
            canary_percentage: overrides.canary_percentage.unwrap_or(self.canary_percentage),
            active_version: overrides.active_version.unwrap_or(self.active_version),
            test_percentage: overrides.test_percentage.unwrap_or(self.test_percentage),
            enabled_regions: overrides
                .enabled_regions
                .clone()
                .unwrap_or_else(|| self.enabled_regions.clone()),
        }
    }
}

fn check_percentage(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=100.0).contains(&v) => Err(MigrationError::InvalidConfig(format!(
            "{field} must be within [0, 100], got {v}"
        ))),
        _ => Ok(()),
    }
}

/// Strategy and rules of one router, swapped atomically.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RouterState {
    pub strategy: TrafficStrategy,
    pub rules: RoutingRules,
}
