//! Selection, failover and probing against scripted instances

mod common;

use std::time::{Duration, Instant};

use common::{Behavior, ScriptedClient, dispatcher, get, pool, quick_policy};
use http::StatusCode;
use order_router::{AttemptError, ProbeSettings, Prober, RoutingError};

#[tokio::test]
async fn test_fails_over_when_fewer_than_budget_are_down() {
    let pool = pool(4);
    let client = ScriptedClient::new(&[("i0", Behavior::Refuse), ("i1", Behavior::Refuse)]);
    let dispatcher = dispatcher(&pool, &client, quick_policy(3));

    let dispatched = dispatcher.dispatch(get("/api/orders")).await.unwrap();
    assert_eq!(dispatched.response.status, StatusCode::OK);
    assert_eq!(dispatched.instance, "i2");
    assert_eq!(dispatched.attempts, 3);

    // Failed instances leave rotation
    assert!(!pool.upstreams()[0].is_healthy());
    assert!(!pool.upstreams()[1].is_healthy());
    assert_eq!(pool.healthy_count(), 2);

    // The next request goes straight to a live instance
    let dispatched = dispatcher.dispatch(get("/api/orders")).await.unwrap();
    assert_eq!(dispatched.attempts, 1);
    assert_eq!(client.calls("i0"), 1);
    assert_eq!(client.calls("i1"), 1);
}

#[tokio::test]
async fn test_no_healthy_instance_fails_fast() {
    let pool = pool(3);
    for upstream in pool.upstreams() {
        upstream.mark_unhealthy();
    }
    let client = ScriptedClient::new(&[]);
    let policy = quick_policy(3).with_backoff(
        Duration::from_secs(5),
        2,
        Duration::from_secs(5),
    );
    let dispatcher = dispatcher(&pool, &client, policy);

    let started = Instant::now();
    let err = dispatcher.dispatch(get("/api/orders")).await.unwrap_err();
    assert!(matches!(err, RoutingError::NoHealthyUpstream));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.total_calls(), 0);
}

#[tokio::test]
async fn test_exhausted_budget_reports_last_failure() {
    let pool = pool(4);
    let client = ScriptedClient::new(&[
        ("i0", Behavior::Refuse),
        ("i1", Behavior::Refuse),
        ("i2", Behavior::Refuse),
        ("i3", Behavior::Refuse),
    ]);
    let dispatcher = dispatcher(&pool, &client, quick_policy(3));

    match dispatcher.dispatch(get("/api/orders")).await {
        Err(RoutingError::UpstreamUnavailable {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(last_error, AttemptError::Connect(_)));
        }
        other => panic!("expected UpstreamUnavailable, got {other:?}"),
    }

    // Each attempt went to a distinct instance; the fourth was never tried
    assert_eq!(client.calls("i0"), 1);
    assert_eq!(client.calls("i1"), 1);
    assert_eq!(client.calls("i2"), 1);
    assert_eq!(client.calls("i3"), 0);
    assert!(pool.upstreams()[3].is_healthy());
}

#[tokio::test]
async fn test_budget_larger_than_pool() {
    let pool = pool(2);
    let client = ScriptedClient::new(&[("i0", Behavior::Refuse), ("i1", Behavior::Refuse)]);
    let dispatcher = dispatcher(&pool, &client, quick_policy(5));

    match dispatcher.dispatch(get("/api/orders")).await {
        Err(RoutingError::UpstreamUnavailable { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected UpstreamUnavailable, got {other:?}"),
    }
    assert_eq!(client.total_calls(), 2);
}

#[tokio::test]
async fn test_client_errors_pass_through_without_retry() {
    for status in [
        StatusCode::UNAUTHORIZED,
        StatusCode::TOO_MANY_REQUESTS,
        StatusCode::NOT_FOUND,
        StatusCode::INTERNAL_SERVER_ERROR,
    ] {
        let pool = pool(3);
        let client = ScriptedClient::new(&[("i0", Behavior::Respond(status))]);
        let dispatcher = dispatcher(&pool, &client, quick_policy(3));

        let dispatched = dispatcher.dispatch(get("/api/orders")).await.unwrap();
        assert_eq!(dispatched.response.status, status);
        assert_eq!(dispatched.instance, "i0");
        assert_eq!(dispatched.attempts, 1);
        assert_eq!(client.total_calls(), 1);
        assert!(pool.upstreams()[0].is_healthy());
    }
}

#[tokio::test]
async fn test_gateway_statuses_fail_over() {
    let pool = pool(3);
    let client = ScriptedClient::new(&[
        ("i0", Behavior::Respond(StatusCode::SERVICE_UNAVAILABLE)),
        ("i1", Behavior::Respond(StatusCode::BAD_GATEWAY)),
    ]);
    let dispatcher = dispatcher(&pool, &client, quick_policy(3));

    let dispatched = dispatcher.dispatch(get("/api/orders")).await.unwrap();
    assert_eq!(dispatched.instance, "i2");
    assert_eq!(dispatched.attempts, 3);
    assert_eq!(dispatched.response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_hung_instance_times_out_and_fails_over() {
    let pool = pool(2);
    let client = ScriptedClient::new(&[("i0", Behavior::Hang)]);
    let dispatcher = dispatcher(&pool, &client, quick_policy(3));

    let started = Instant::now();
    let dispatched = dispatcher.dispatch(get("/api/orders")).await.unwrap();
    assert_eq!(dispatched.instance, "i1");
    assert_eq!(dispatched.attempts, 2);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!pool.upstreams()[0].is_healthy());
    assert_eq!(pool.upstreams()[0].outstanding(), 0);
}

#[tokio::test]
async fn test_prefers_least_outstanding() {
    let pool = pool(3);
    let client = ScriptedClient::new(&[]);
    let dispatcher = dispatcher(&pool, &client, quick_policy(3));

    let busy0 = pool.upstreams()[0].begin();
    let _busy1a = pool.upstreams()[1].begin();
    let _busy1b = pool.upstreams()[1].begin();

    let dispatched = dispatcher.dispatch(get("/api/orders")).await.unwrap();
    assert_eq!(dispatched.instance, "i2");

    drop(busy0);
    let dispatched = dispatcher.dispatch(get("/api/orders")).await.unwrap();
    assert_eq!(dispatched.instance, "i0");
}

#[tokio::test]
async fn test_prober_threshold_and_recovery() {
    let pool = pool(2);
    let client = ScriptedClient::new(&[("i0", Behavior::Refuse)]);
    let settings = ProbeSettings {
        interval: Duration::from_secs(30),
        timeout: Duration::from_millis(200),
        unhealthy_threshold: 3,
    };
    let prober = Prober::new(pool.clone(), client.clone(), settings);

    prober.probe_all().await;
    prober.probe_all().await;
    assert!(pool.upstreams()[0].is_healthy());
    assert_eq!(pool.upstreams()[0].consecutive_failures(), 2);

    prober.probe_all().await;
    assert!(!pool.upstreams()[0].is_healthy());
    assert!(pool.upstreams()[1].is_healthy());

    client.set("i0", Behavior::Respond(StatusCode::OK));
    prober.probe_all().await;
    assert!(pool.upstreams()[0].is_healthy());
    assert_eq!(pool.upstreams()[0].consecutive_failures(), 0);
    assert!(pool.status()[0].last_probe_ms.is_some());
}

#[tokio::test]
async fn test_hung_probe_counts_as_failure() {
    let pool = pool(1);
    let client = ScriptedClient::new(&[("i0", Behavior::Hang)]);
    let settings = ProbeSettings {
        interval: Duration::from_secs(30),
        timeout: Duration::from_millis(50),
        unhealthy_threshold: 1,
    };
    let prober = Prober::new(pool.clone(), client.clone(), settings);

    prober.probe_all().await;
    assert!(!pool.any_healthy());
}
