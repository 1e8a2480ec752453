//! Simulated backend used by the demo binary and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::TransportError;
use crate::load_balancer::random::{RandomSource, ThreadRandom};
use crate::routing::request::{Request, Response};
use crate::transport::Transport;

/// In-process backend with configurable latency and failure rate.
pub struct SimulatedTransport {
    latency: Duration,
    failure_rate: f64,
    /// Forces every call to fail while set.
    down: AtomicBool,
    calls: AtomicU64,
    rng: Arc<dyn RandomSource>,
}

impl SimulatedTransport {
    pub fn new(latency: Duration, failure_rate: f64) -> Self {
        Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            down: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            rng: Arc::new(ThreadRandom),
        }
    }

    /// A backend that always answers immediately.
    pub fn healthy() -> Self {
        Self::new(Duration::ZERO, 0.0)
    }

    pub fn with_rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of invocations received, including failed ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn invoke(&self, endpoint: &str, request: &Request) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::with_status(format!("{endpoint} is down"), 503));
        }
        if self.failure_rate > 0.0 && self.rng.next_f64() < self.failure_rate {
            return Err(TransportError::with_status(
                format!("{endpoint} failed to handle {}", request.path),
                500,
            ));
        }

        Ok(Response::ok(json!({
            "endpoint": endpoint,
            "path": request.path,
        })))
    }
}
