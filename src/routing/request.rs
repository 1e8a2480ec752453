//! Request, response and per-call routing context.
//!
//! # Design Decisions
//! - The core only reads routing attributes (subject ids, headers, region);
//!   everything else travels opaquely in `payload`
//! - Header names are normalized to lowercase on insert and lookup
//! - The transport owns the response body; the engine only annotates headers

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::load_balancer::pool::Pool;
use crate::routing::strategy::RuleOverrides;

/// Response header naming the instance that served the request.
pub const SERVED_BY_HEADER: &str = "x-served-by";
/// Response header carrying the version of the serving instance.
pub const SERVICE_VERSION_HEADER: &str = "x-service-version";
/// Response header carrying the trace id of the routed call.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Inbound request as seen by the router.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Request {
    pub user_id: Option<String>,
    pub customer_id: Option<String>,
    headers: HashMap<String, String>,
    pub region: Option<String>,
    pub path: String,
    pub payload: serde_json::Value,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Stable subject used for A/B bucketing: user id first, then customer id.
    pub fn subject_id(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.customer_id.as_deref())
    }
}

/// Response returned by a transport.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl Response {
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Per-call routing parameters. Unset fields fall back to the router's rules.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingContext {
    #[serde(flatten)]
    pub overrides: RuleOverrides,
    /// Region used by geo routing; takes precedence over `Request::region`.
    pub region: Option<String>,
}

impl RoutingContext {
    pub fn canary(percentage: f64) -> Self {
        Self {
            overrides: RuleOverrides {
                canary_percentage: Some(percentage),
                ..RuleOverrides::default()
            },
            ..Self::default()
        }
    }

    pub fn ab_test(percentage: f64) -> Self {
        Self {
            overrides: RuleOverrides {
                test_percentage: Some(percentage),
                ..RuleOverrides::default()
            },
            ..Self::default()
        }
    }

    pub fn blue_green(active: Pool) -> Self {
        Self {
            overrides: RuleOverrides {
                active_version: Some(active),
                ..RuleOverrides::default()
            },
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}
