//! Instance health flag.
//!
//! # States
//! - Unknown: never probed, receives traffic
//! - Healthy: last probe succeeded
//! - Unhealthy: excluded from selection until a prober marks it healthy again

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Lock-free health flag set by an external prober.
#[derive(Debug)]
pub struct HealthFlag {
    state: AtomicU8,
}

impl Default for HealthFlag {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
        }
    }
}

impl HealthFlag {
    pub fn get(&self) -> HealthState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Store a new state, returning the previous one.
    pub fn set(&self, state: HealthState) -> HealthState {
        self.state.swap(state as u8, Ordering::AcqRel).into()
    }

    /// Return true unless the instance was explicitly marked unhealthy.
    pub fn is_healthy(&self) -> bool {
        self.get() != HealthState::Unhealthy
    }
}
