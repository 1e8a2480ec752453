//! Weighted random load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{instance::ServiceInstance, random::RandomSource, LoadBalancer};

/// Weighted random selector.
/// Selection probability is `weight / sum(weights of healthy instances)`.
pub struct WeightedRandom {
    rng: Arc<dyn RandomSource>,
}

impl WeightedRandom {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self { rng }
    }
}

impl LoadBalancer for WeightedRandom {
    fn next_instance(&self, instances: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        // Health is sampled once so the total and the walk agree.
        let healthy: Vec<&Arc<ServiceInstance>> = instances.iter().filter(|i| i.is_healthy()).collect();
        let total: u64 = healthy.iter().map(|i| u64::from(i.weight())).sum();
        if total == 0 {
            return None;
        }

        let mut target = self.rng.next_f64() * total as f64;
        for instance in &healthy {
            let weight = f64::from(instance.weight());
            if target < weight {
                return Some(Arc::clone(instance));
            }
            target -= weight;
        }
        // Float rounding can leave target a hair above the last bucket.
        healthy.last().map(|i| Arc::clone(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthState;
    use crate::load_balancer::instance::tests::instance;
    use crate::load_balancer::pool::Pool;
    use crate::load_balancer::random::SeededRandom;
    use crate::transport::SimulatedTransport;

    fn pair(w1: u32, w2: u32) -> Vec<Arc<ServiceInstance>> {
        let t = Arc::new(SimulatedTransport::healthy());
        vec![
            instance("a", Pool::Legacy, w1, t.clone()),
            instance("b", Pool::Legacy, w2, t),
        ]
    }

    #[test]
    fn test_weighted_proportions() {
        let lb = WeightedRandom::new(Arc::new(SeededRandom::new(42)));
        let instances = pair(3, 1);

        let mut hits_a = 0u32;
        let mut hits_b = 0u32;
        for _ in 0..10_000 {
            match lb.next_instance(&instances).unwrap().id() {
                "a" => hits_a += 1,
                _ => hits_b += 1,
            }
        }
        let ratio = f64::from(hits_a) / f64::from(hits_b);
        assert!((2.7..=3.3).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn test_skips_unhealthy() {
        let lb = WeightedRandom::new(Arc::new(SeededRandom::new(1)));
        let instances = pair(100, 1);
        instances[0].set_health(HealthState::Unhealthy);

        for _ in 0..1_000 {
            assert_eq!(lb.next_instance(&instances).unwrap().id(), "b");
        }
    }

    #[test]
    fn test_none_when_all_unhealthy() {
        let lb = WeightedRandom::new(Arc::new(SeededRandom::new(1)));
        let instances = pair(1, 1);
        for i in &instances {
            i.set_health(HealthState::Unhealthy);
        }
        assert!(lb.next_instance(&instances).is_none());
        assert!(lb.next_instance(&[]).is_none());
    }
}
