//! Per-request span recorder.
//!
//! # Responsibilities
//! - Create one trace per routed request with a root span
//! - Record child spans for primary and shadow calls
//! - Produce serializable summaries for `get_traces()`
//!
//! # Design Decisions
//! - Append-only: spans are appended in the order their operations start and
//!   are never removed, only closed
//! - End times may arrive out of order (a shadow span can close after the
//!   caller already has its response)
//! - Shared as `Arc<TraceContext>`; a mutex guards the span list
//! - Timestamps come from `tokio::time::Instant`, so durations follow the
//!   runtime clock and freeze or jump with it when the clock is paused

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

pub type SpanId = Uuid;

fn as_ms(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

/// A timestamped log line attached to a span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanLog {
    /// Milliseconds since the trace started.
    pub at_ms: f64,
    pub message: String,
}

/// One timed operation inside a trace.
#[derive(Debug, Clone)]
pub struct Span {
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub start: Instant,
    pub end: Option<Instant>,
    pub tags: BTreeMap<String, String>,
    pub logs: Vec<SpanLog>,
}

impl Span {
    pub fn duration_ms(&self) -> Option<f64> {
        self.end
            .map(|end| as_ms(end.duration_since(self.start)))
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanSummary {
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    /// `None` while the span is still open.
    pub duration_ms: Option<f64>,
    pub tags: BTreeMap<String, String>,
    pub logs: Vec<SpanLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSummary {
    pub trace_id: Uuid,
    /// Duration of the root span, or time elapsed so far if it is still open.
    pub total_duration_ms: f64,
    pub spans: Vec<SpanSummary>,
}

/// Causally ordered span recorder for one logical request.
#[derive(Debug)]
pub struct TraceContext {
    trace_id: Uuid,
    root_span_id: SpanId,
    started: Instant,
    spans: Mutex<Vec<Span>>,
}

impl TraceContext {
    /// Start a trace whose root span is named `root_name`. Timings are read
    /// from the tokio clock.
    pub fn new(root_name: impl Into<String>) -> Self {
        let started = Instant::now();
        let root_span_id = Uuid::new_v4();
        Self {
            trace_id: Uuid::new_v4(),
            root_span_id,
            started,
            spans: Mutex::new(vec![Span {
                span_id: root_span_id,
                parent_span_id: None,
                name: root_name.into(),
                start: started,
                end: None,
                tags: BTreeMap::new(),
                logs: Vec::new(),
            }]),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn root_span_id(&self) -> SpanId {
        self.root_span_id
    }

    /// Open a child span of `parent` and return its id.
    pub fn start_span(&self, name: impl Into<String>, parent: SpanId) -> SpanId {
        let span_id = Uuid::new_v4();
        self.lock().push(Span {
            span_id,
            parent_span_id: Some(parent),
            name: name.into(),
            start: Instant::now(),
            end: None,
            tags: BTreeMap::new(),
            logs: Vec::new(),
        });
        span_id
    }

    pub fn tag(&self, span: SpanId, key: impl Into<String>, value: impl ToString) {
        self.with_span(span, |s| {
            s.tags.insert(key.into(), value.to_string());
        });
    }

    pub fn log(&self, span: SpanId, message: impl Into<String>) {
        let at_ms = as_ms(self.started.elapsed());
        self.with_span(span, |s| {
            s.logs.push(SpanLog {
                at_ms,
                message: message.into(),
            });
        });
    }

    /// Close a span. Closing twice keeps the first end time.
    pub fn finish(&self, span: SpanId) {
        let now = Instant::now();
        self.with_span(span, |s| {
            s.end.get_or_insert(now);
        });
    }

    /// Copy of the spans in start order.
    pub fn spans(&self) -> Vec<Span> {
        self.lock().clone()
    }

    pub fn summary(&self) -> TraceSummary {
        let spans = self.lock();
        let total_duration_ms = spans
            .first()
            .and_then(Span::duration_ms)
            .unwrap_or_else(|| as_ms(self.started.elapsed()));

        TraceSummary {
            trace_id: self.trace_id,
            total_duration_ms,
            spans: spans
                .iter()
                .map(|s| SpanSummary {
                    span_id: s.span_id,
                    parent_span_id: s.parent_span_id,
                    name: s.name.clone(),
                    duration_ms: s.duration_ms(),
                    tags: s.tags.clone(),
                    logs: s.logs.clone(),
                })
                .collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Span>> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_span(&self, span: SpanId, f: impl FnOnce(&mut Span)) {
        let mut spans = self.lock();
        // Recent spans are the usual target.
        if let Some(s) = spans.iter_mut().rev().find(|s| s.span_id == span) {
            f(s);
        }
    }
}
