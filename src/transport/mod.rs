//! Transport plug-in contract.
//!
//! # Responsibilities
//! - Define the single asynchronous `invoke` call the engine depends on
//! - Provide a simulated transport for demos and tests
//!
//! # Design Decisions
//! - The engine never talks to the network itself; a real HTTP or gRPC client
//!   implements `Transport`
//! - Latency is not bounded here; timeouts belong to the transport or to the
//!   shadow path
//! - Errors are returned as `TransportError` and surfaced verbatim

pub mod simulated;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::routing::request::{Request, Response};

pub use simulated::SimulatedTransport;

/// Invokes one backend endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, endpoint: &str, request: &Request) -> Result<Response, TransportError>;
}
