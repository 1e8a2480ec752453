//! Failure injection: breaker trips and recovery, shadow isolation, shutdown.

use std::sync::Arc;
use std::time::Duration;

use strangler_router::health::HealthState;
use strangler_router::observability::events::MigrationEvent;
use strangler_router::resilience::circuit_breaker::BreakerConfig;
use strangler_router::resilience::CircuitState;
use strangler_router::transport::SimulatedTransport;
use strangler_router::{
    InstanceSpec, MigrationError, MigrationOrchestrator, OrchestratorOptions, Pool, Request, RoutingContext,
    ServiceSpec, TrafficStrategy,
};

mod common;

#[tokio::test]
async fn test_primary_failure_propagates_verbatim() {
    let orch = MigrationOrchestrator::new();
    let (spec, backends) = common::service(TrafficStrategy::BlueGreen);
    orch.register_service("auth", spec).unwrap();
    backends.legacy.set_down(true);

    let err = orch
        .route("auth", &Request::new("/login"), &RoutingContext::default())
        .await
        .unwrap_err();
    match err {
        MigrationError::Transport(e) => {
            assert_eq!(e.status, Some(503));
            assert!(e.message.contains("legacy-auth:8080"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let m = orch.get_metrics("auth").unwrap();
    assert_eq!((m.total_requests, m.legacy_requests, m.errors), (1, 1, 1));
    assert_eq!(orch.get_traces()[0].spans[0].tags.get("outcome").map(String::as_str), Some("error"));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_trips_and_recovers_through_routing() {
    let orch = MigrationOrchestrator::new();
    let (spec, backends) = common::service(TrafficStrategy::BlueGreen);
    orch.register_service("auth", spec.with_breaker(common::fast_breaker(1000))).unwrap();
    let mut events = orch.subscribe();
    let ctx = RoutingContext::default();

    backends.legacy.set_down(true);
    for _ in 0..2 {
        assert!(matches!(
            orch.route("auth", &Request::new("/"), &ctx).await,
            Err(MigrationError::Transport(_))
        ));
    }

    // The only legacy instance is open: the pool is exhausted.
    let err = orch.route("auth", &Request::new("/"), &ctx).await.unwrap_err();
    assert_eq!(
        err,
        MigrationError::NoHealthyInstances {
            service: "auth".into(),
            pool: Pool::Legacy
        }
    );
    assert_eq!(backends.legacy.calls(), 2);

    tokio::time::advance(Duration::from_millis(1000)).await;
    backends.legacy.set_down(false);
    orch.route("auth", &Request::new("/"), &ctx).await.unwrap();
    assert_eq!(orch.instances("auth").unwrap()[0].circuit, CircuitState::Closed);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MigrationEvent::CircuitStateChanged { breaker, from, to } = event {
            assert_eq!(breaker, "auth-legacy-0");
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_saturated_half_open_instance_yields_to_sibling() {
    let orch = Arc::new(MigrationOrchestrator::with_options(OrchestratorOptions::seeded(3)));
    let heavy = Arc::new(SimulatedTransport::new(Duration::from_millis(100), 0.0));
    let light = Arc::new(SimulatedTransport::healthy());
    let spec = ServiceSpec::new(TrafficStrategy::BlueGreen)
        .with_breaker(BreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: 1000,
            half_open_probe_count: 1,
        })
        .legacy(InstanceSpec::new("legacy-a:8080", "1.0.0", heavy.clone()).with_weight(1000))
        .legacy(InstanceSpec::new("legacy-b:8080", "1.0.0", light.clone()))
        .new_instance(InstanceSpec::new("new-a:8080", "2.0.0", Arc::new(SimulatedTransport::healthy())));
    orch.register_service("auth", spec).unwrap();
    let ctx = RoutingContext::default();
    let heavy_circuit = |orch: &MigrationOrchestrator| orch.instances("auth").unwrap()[0].circuit;

    heavy.set_down(true);
    for _ in 0..10 {
        if heavy_circuit(&orch) == CircuitState::Open {
            break;
        }
        let _ = orch.route("auth", &Request::new("/"), &ctx).await;
    }
    assert_eq!(heavy_circuit(&orch), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1000)).await;
    heavy.set_down(false);

    // Start calls until one holds the only half-open slot.
    let mut pending = Vec::new();
    for _ in 0..10 {
        if heavy_circuit(&orch) == CircuitState::HalfOpen {
            break;
        }
        let orch = Arc::clone(&orch);
        pending.push(tokio::spawn(async move {
            orch.route("auth", &Request::new("/"), &RoutingContext::default()).await
        }));
        tokio::task::yield_now().await;
    }
    assert_eq!(heavy_circuit(&orch), CircuitState::HalfOpen);

    let light_before = light.calls();
    for _ in 0..20 {
        let resp = orch.route("auth", &Request::new("/"), &ctx).await.unwrap();
        assert_eq!(common::served_by(&resp), "auth-legacy-1");
    }
    assert_eq!(light.calls(), light_before + 20);

    for handle in pending {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(heavy_circuit(&orch), CircuitState::Closed);
}

#[tokio::test]
async fn test_shadow_failure_never_reaches_caller() {
    let orch = MigrationOrchestrator::new();
    let (spec, backends) = common::service(TrafficStrategy::Shadow);
    orch.register_service("auth", spec).unwrap();
    backends.new.set_down(true);

    let resp = orch
        .route("auth", &Request::new("/login").with_user("u1"), &RoutingContext::default())
        .await
        .unwrap();
    assert_eq!(common::served_by(&resp), "auth-legacy-0");

    orch.wait_for_shadows().await;
    let m = orch.get_metrics("auth").unwrap();
    assert_eq!(m.shadow_requests, 1);
    assert_eq!(m.shadow_errors, 1);
    assert_eq!(m.errors, 0);
    assert_eq!(m.legacy_requests, 1);
    assert_eq!(backends.new.calls(), 1);

    let trace = &orch.get_traces()[0];
    let names: Vec<&str> = trace.spans.iter().map(|s| s.name.as_str()).collect();
    let shadow = names.iter().position(|n| *n == "shadow").unwrap();
    let primary = names.iter().position(|n| *n == "auth.legacy").unwrap();
    let copy = names.iter().position(|n| *n == "auth.new").unwrap();
    assert!(shadow < primary);
    assert_eq!(trace.spans[copy].parent_span_id, Some(trace.spans[shadow].span_id));
    assert_eq!(trace.spans[shadow].tags.get("outcome").map(String::as_str), Some("error"));
}

#[tokio::test]
async fn test_shadow_skipped_when_new_pool_exhausted() {
    let orch = MigrationOrchestrator::new();
    let (spec, _) = common::service(TrafficStrategy::Shadow);
    orch.register_service("auth", spec).unwrap();
    orch.set_instance_health("auth", "auth-new-0", HealthState::Unhealthy).unwrap();

    orch.route("auth", &Request::new("/"), &RoutingContext::default()).await.unwrap();
    orch.wait_for_shadows().await;

    let m = orch.get_metrics("auth").unwrap();
    assert_eq!((m.shadow_requests, m.shadow_errors, m.errors), (0, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_slow_shadow_does_not_delay_caller() {
    let orch = MigrationOrchestrator::with_options(OrchestratorOptions {
        shadow_timeout: Duration::from_millis(200),
        ..OrchestratorOptions::default()
    });
    let (spec, _) =
        common::service_with_latency(TrafficStrategy::Shadow, Duration::from_millis(10), Duration::from_secs(30));
    orch.register_service("auth", spec).unwrap();

    let started = tokio::time::Instant::now();
    orch.route("auth", &Request::new("/"), &RoutingContext::default()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(orch.shadows_in_flight(), 1);

    orch.wait_for_shadows().await;
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(30));

    let m = orch.get_metrics("auth").unwrap();
    assert_eq!((m.shadow_requests, m.shadow_errors), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_shadows() {
    let orch = MigrationOrchestrator::with_options(OrchestratorOptions {
        shadow_timeout: Duration::from_secs(60),
        ..OrchestratorOptions::default()
    });
    let (spec, _) = common::service_with_latency(TrafficStrategy::Shadow, Duration::ZERO, Duration::from_secs(30));
    orch.register_service("auth", spec).unwrap();

    orch.route("auth", &Request::new("/"), &RoutingContext::default()).await.unwrap();
    let started = tokio::time::Instant::now();
    orch.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(orch.shadows_in_flight(), 0);

    // Primary traffic still flows, shadow copies are skipped.
    orch.route("auth", &Request::new("/"), &RoutingContext::default()).await.unwrap();
    let m = orch.get_metrics("auth").unwrap();
    assert_eq!((m.legacy_requests, m.shadow_requests, m.shadow_errors), (2, 1, 2));
}

#[tokio::test]
async fn test_unhealthy_new_pool_fails_canary() {
    let orch = MigrationOrchestrator::new();
    let (spec, _) = common::service(TrafficStrategy::Canary);
    orch.register_service("auth", spec).unwrap();
    orch.set_instance_health("auth", "auth-new-0", HealthState::Unhealthy).unwrap();

    let err = orch
        .route("auth", &Request::new("/"), &RoutingContext::canary(100.0))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::NoHealthyInstances { pool: Pool::New, .. }));

    orch.set_instance_health("auth", "auth-new-0", HealthState::Healthy).unwrap();
    assert!(orch.route("auth", &Request::new("/"), &RoutingContext::canary(100.0)).await.is_ok());
}
