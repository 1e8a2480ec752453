//! Pool decision logic.
//!
//! # Responsibilities
//! - Match version-selection headers
//! - Match request region against the enabled set
//! - Bucket subject ids for A/B tests
//! - Turn canary draws and percentage counters into a pool
//!
//! # Design Decisions
//! - Pure functions of their inputs; the router supplies randomness and counters
//! - Header names are case-insensitive, header values are trimmed and
//!   compared case-insensitively
//! - Region matching is exact (region ids are identifiers, not display names)
//! - Anything unrecognized means legacy

use std::collections::BTreeSet;

use crate::load_balancer::pool::Pool;
use crate::routing::request::Request;

/// Explicit opt-in/opt-out header.
pub const USE_NEW_VERSION_HEADER: &str = "x-use-new-version";
/// Named version header.
pub const VERSION_HEADER: &str = "x-version";

/// Trait for matching requests that should be served by the new pool.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request should go to the new pool.
    fn matches(&self, req: &Request) -> bool;
}

/// Matches the version-selection headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderMatcher;

impl HeaderMatcher {
    fn flag(value: &str) -> Option<bool> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    fn version(value: &str) -> Option<bool> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" | "next" | "v2" => Some(true),
            "legacy" | "old" | "v1" => Some(false),
            _ => None,
        }
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, req: &Request) -> bool {
        // The explicit flag wins over the named version.
        req.header(USE_NEW_VERSION_HEADER)
            .and_then(Self::flag)
            .or_else(|| req.header(VERSION_HEADER).and_then(Self::version))
            .unwrap_or(false)
    }
}

/// Matches requests whose region is in the enabled set.
#[derive(Debug, Clone)]
pub struct RegionMatcher<'a> {
    enabled: &'a BTreeSet<String>,
    /// Overrides the request's own region when set.
    region: Option<&'a str>,
}

impl<'a> RegionMatcher<'a> {
    pub fn new(enabled: &'a BTreeSet<String>, region: Option<&'a str>) -> Self {
        Self { enabled, region }
    }
}

impl Matcher for RegionMatcher<'_> {
    fn matches(&self, req: &Request) -> bool {
        self.region
            .or(req.region.as_deref())
            .map(|r| self.enabled.contains(r))
            .unwrap_or(false)
    }
}

/// Stable bucket in `[0, 100)` for a subject id.
///
/// 31-multiplier string hash over UTF-16 code units, wrapping at 32 bits, so
/// the bucket never changes across processes or releases.
pub fn ab_bucket(subject: &str) -> u32 {
    let hash = subject
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)));
    hash.unsigned_abs() % 100
}

/// A/B decision: subjects whose bucket is below `test_percentage` get the new pool.
pub fn ab_test(subject: Option<&str>, test_percentage: f64) -> Pool {
    match subject {
        Some(id) if f64::from(ab_bucket(id)) < test_percentage => Pool::New,
        _ => Pool::Legacy,
    }
}

/// Canary decision for a uniform draw in `[0, 1)`.
pub fn canary(draw: f64, percentage: f64) -> Pool {
    if draw * 100.0 < percentage {
        Pool::New
    } else {
        Pool::Legacy
    }
}

/// Percentage decision for the `sequence`-th request (0-based).
///
/// Sends request n to the new pool when `floor((n + 1) * p / 100)` steps past
/// `floor(n * p / 100)`, so the first n requests contain exactly
/// `floor(n * p / 100)` new-pool hits.
pub fn percentage(sequence: u64, percentage: f64) -> Pool {
    let share = percentage / 100.0;
    let before = (sequence as f64 * share).floor();
    let after = ((sequence + 1) as f64 * share).floor();
    if after > before {
        Pool::New
    } else {
        Pool::Legacy
    }
}

pub fn to_pool(new: bool) -> Pool {
    if new {
        Pool::New
    } else {
        Pool::Legacy
    }
}
