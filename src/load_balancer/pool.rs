//! Instance pool management.
//!
//! # Responsibilities
//! - Name the two pools of a migrating service (legacy and new)
//! - Hold each pool's instances and apply the load balancing algorithm
//! - Look instances up by id for the external health prober

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::load_balancer::{instance::ServiceInstance, LoadBalancer};

/// Which implementation of a service an instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Legacy,
    New,
}

impl Pool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Legacy => "legacy",
            Pool::New => "new",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pool {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(Pool::Legacy),
            "new" => Ok(Pool::New),
            other => Err(MigrationError::InvalidConfig(format!("unknown pool '{other}'"))),
        }
    }
}

/// Instances of one pool.
#[derive(Debug, Default)]
pub struct InstancePool {
    instances: Vec<Arc<ServiceInstance>>,
}

impl InstancePool {
    pub fn new(instances: Vec<Arc<ServiceInstance>>) -> Self {
        Self { instances }
    }

    pub fn instances(&self) -> &[Arc<ServiceInstance>] {
        &self.instances
    }

    /// Select one healthy instance or fail with `NoHealthyInstances`.
    pub fn select(&self, lb: &dyn LoadBalancer, service: &str, pool: Pool) -> Result<Arc<ServiceInstance>> {
        match lb.next_instance(&self.instances) {
            Some(instance) => Ok(instance),
            None => {
                tracing::debug!(
                    service = %service,
                    pool = %pool,
                    instance_count = self.instances.len(),
                    "No healthy instances found in pool"
                );
                Err(MigrationError::NoHealthyInstances {
                    service: service.to_string(),
                    pool,
                })
            }
        }
    }

    pub fn find(&self, id: &str) -> Option<&Arc<ServiceInstance>> {
        self.instances.iter().find(|i| i.id() == id)
    }
}
