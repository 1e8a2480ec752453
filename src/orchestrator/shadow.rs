//! Fire-and-forget shadow dispatch.
//!
//! The shadow copy runs on a detached task that is tracked by the shutdown
//! coordinator and bounded by the shadow timeout. Its outcome lands in the
//! service metrics, the event bus and the request's trace; nothing reaches
//! the caller of `route()`.

use std::sync::Arc;

use crate::error::Result;
use crate::load_balancer::instance::ServiceInstance;
use crate::observability::events::{EventSink, MigrationEvent};
use crate::observability::trace::{SpanId, TraceContext};
use crate::orchestrator::service::MigratingService;
use crate::orchestrator::MigrationOrchestrator;
use crate::resilience::timeouts::{run_bounded, Bounded};
use crate::routing::request::Request;

impl MigrationOrchestrator {
    pub(super) fn dispatch_shadow(
        &self,
        service: &Arc<MigratingService>,
        selection: Result<Arc<ServiceInstance>>,
        request: &Request,
        trace: &Arc<TraceContext>,
    ) {
        let span = trace.start_span("shadow", trace.root_span_id());
        // Subscribe before the flag check so a concurrent trigger is never missed.
        let cancel = self.shutdown.subscribe();

        let instance = match selection {
            Ok(_) if self.shutdown.is_triggered() => {
                self.skip_shadow(service, trace, span, "shutting down");
                return;
            }
            Ok(instance) => instance,
            Err(err) => {
                self.skip_shadow(service, trace, span, &err.to_string());
                return;
            }
        };

        trace.tag(span, "instance", instance.id());
        let guard = self.shutdown.track();
        let limit = self.options.shadow_timeout;
        let service = Arc::clone(service);
        let events = Arc::clone(&self.events);
        let trace = Arc::clone(trace);
        let request = request.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let outcome = run_bounded(instance.call(&request, &trace, span), limit, cancel).await;

            let success = match outcome {
                Bounded::Completed(Ok(_)) => true,
                Bounded::Completed(Err(err)) => {
                    tracing::warn!(service = %service.name, instance = %instance.id(), error = %err, "Shadow call failed");
                    false
                }
                Bounded::TimedOut => {
                    trace.log(span, format!("timed out after {}ms", limit.as_millis()));
                    tracing::warn!(service = %service.name, instance = %instance.id(), "Shadow call timed out");
                    false
                }
                Bounded::Cancelled => {
                    trace.log(span, "cancelled by shutdown");
                    false
                }
            };

            trace.tag(span, "outcome", if success { "success" } else { "error" });
            trace.finish(span);
            service.metrics.record_shadow(success);
            events.emit(MigrationEvent::ShadowCompleted {
                service: service.name.clone(),
                instance: Some(instance.id().to_string()),
                success,
            });
        });
    }

    fn skip_shadow(&self, service: &MigratingService, trace: &TraceContext, span: SpanId, reason: &str) {
        tracing::warn!(service = %service.name, reason, "Shadow copy skipped");
        trace.tag(span, "outcome", "skipped");
        trace.log(span, reason);
        trace.finish(span);
        service.metrics.record_shadow_skipped();
        self.events.emit(MigrationEvent::ShadowCompleted {
            service: service.name.clone(),
            instance: None,
            success: false,
        });
    }
}
