//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (weights > 0, percentages in [0, 100])
//! - Detect duplicate or empty service names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MigrationConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{InstanceConfig, MigrationConfig};
use crate::resilience::circuit_breaker::BreakerConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    /// Dotted location of the offending field, e.g. `services[0].legacy[1].weight`.
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &MigrationConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.max_traces == 0 {
        errors.push(ValidationError::new("max_traces", "must be at least 1"));
    }
    if config.shadow.timeout_ms == 0 {
        errors.push(ValidationError::new("shadow.timeout_ms", "must be positive"));
    }
    validate_breaker("breaker", &config.breaker, &mut errors);

    let mut seen = HashSet::new();
    for (i, svc) in config.services.iter().enumerate() {
        let at = format!("services[{i}]");

        if svc.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{at}.name"), "must not be empty"));
        } else if !seen.insert(svc.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{at}.name"),
                format!("duplicate service '{}'", svc.name),
            ));
        }

        if let Err(e) = svc.rules.validate() {
            errors.push(ValidationError::new(format!("{at}.rules"), e.to_string()));
        }
        if let Some(breaker) = &svc.breaker {
            validate_breaker(&format!("{at}.breaker"), breaker, &mut errors);
        }

        if svc.legacy.is_empty() && svc.new.is_empty() {
            errors.push(ValidationError::new(&at, "needs at least one instance"));
        }
        validate_instances(&format!("{at}.legacy"), &svc.legacy, &mut errors);
        validate_instances(&format!("{at}.new"), &svc.new, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(at: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{at}.failure_threshold"), "must be at least 1"));
    }
    if breaker.half_open_probe_count == 0 {
        errors.push(ValidationError::new(format!("{at}.half_open_probe_count"), "must be at least 1"));
    }
}

fn validate_instances(at: &str, instances: &[InstanceConfig], errors: &mut Vec<ValidationError>) {
    for (j, inst) in instances.iter().enumerate() {
        let at = format!("{at}[{j}]");
        if inst.endpoint.trim().is_empty() {
            errors.push(ValidationError::new(format!("{at}.endpoint"), "must not be empty"));
        }
        if inst.weight == 0 {
            errors.push(ValidationError::new(format!("{at}.weight"), "must be positive"));
        }
        if !(0.0..=1.0).contains(&inst.failure_rate) {
            errors.push(ValidationError::new(format!("{at}.failure_rate"), "must be within [0, 1]"));
        }
    }
}
