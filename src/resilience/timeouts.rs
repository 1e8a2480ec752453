//! Timeout enforcement for detached work.
//!
//! # Responsibilities
//! - Bound the lifetime of fire-and-forget calls (shadow traffic)
//! - Stop early when the owner shuts down
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout and cancellation are distinct outcomes, not errors of the call
//! - The primary path is not bounded here; that belongs to the transport

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

/// How a bounded future ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bounded<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Drive `fut` until it completes, `limit` elapses, or `shutdown` fires.
pub async fn run_bounded<F>(fut: F, limit: Duration, mut shutdown: broadcast::Receiver<()>) -> Bounded<F::Output>
where
    F: Future,
{
    tokio::select! {
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(out) => Bounded::Completed(out),
            Err(_) => Bounded::TimedOut,
        },
        _ = shutdown.recv() => Bounded::Cancelled,
    }
}
