//! Load testing: concurrent routing across services keeps counters consistent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strangler_router::{
    MigrationOrchestrator, OrchestratorOptions, Request, RoutingContext, TrafficStrategy,
};

mod common;

const TASKS: usize = 8;
const REQUESTS_PER_TASK: usize = 250;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_routing_counts_every_request() {
    let orch = Arc::new(MigrationOrchestrator::with_options(OrchestratorOptions {
        max_traces: 100,
        ..OrchestratorOptions::seeded(9)
    }));
    let (canary, canary_backends) = common::service(TrafficStrategy::Canary);
    let (shadow, shadow_backends) = common::service(TrafficStrategy::Shadow);
    orch.register_service("auth", canary).unwrap();
    orch.register_service("billing", shadow).unwrap();

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..TASKS {
        let orch = Arc::clone(&orch);
        handles.push(tokio::spawn(async move {
            let ctx = RoutingContext::canary(50.0);
            for i in 0..REQUESTS_PER_TASK {
                let req = Request::new("/").with_user(format!("{t}-{i}"));
                let service = if i % 2 == 0 { "auth" } else { "billing" };
                orch.route(service, &req, &ctx).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    orch.wait_for_shadows().await;
    let duration = start.elapsed();

    let per_service = (TASKS * REQUESTS_PER_TASK / 2) as u64;
    let all = orch.get_all_metrics();

    let auth = &all["auth"];
    assert_eq!(auth.total_requests, per_service);
    assert_eq!(auth.legacy_requests + auth.new_requests, per_service);
    assert_eq!(canary_backends.legacy.calls() + canary_backends.new.calls(), per_service);
    assert!(auth.new_requests > 0 && auth.legacy_requests > 0);

    let billing = &all["billing"];
    assert_eq!(billing.total_requests, per_service);
    assert_eq!(billing.legacy_requests, per_service);
    assert_eq!(billing.shadow_requests, per_service);
    assert_eq!(billing.shadow_errors, 0);
    assert_eq!(shadow_backends.new.calls(), per_service);

    assert_eq!(orch.get_traces().len(), 100);
    assert!(orch
        .instances("auth")
        .unwrap()
        .iter()
        .all(|i| i.active_calls == 0));

    println!("Routed {} requests in {:?}", TASKS * REQUESTS_PER_TASK, duration);
    assert!(duration < Duration::from_secs(30));
}
