use std::time::Duration;

use approx::assert_relative_eq;
use claim::*;
use fleetwatch::engine::{ConnectionStatus, DashboardView, Engine, EngineHandle, Probe};
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::{mock_settings, test_client, EVENT_STREAM_BODY, FLEET_EXPOSITION, STATS_BODY};

async fn wait_for(
    rx_view: &mut watch::Receiver<DashboardView>, label: &str, ready: impl Fn(&DashboardView) -> bool,
) -> DashboardView {
    let wait = async {
        loop {
            {
                let view = rx_view.borrow_and_update();
                if ready(&view) {
                    return view.clone();
                }
            }
            if rx_view.changed().await.is_err() {
                panic!("engine stopped while waiting for {label}");
            }
        }
    };

    assert_ok!(tokio::time::timeout(Duration::from_secs(5), wait).await, "timed out waiting for {}", label)
}

async fn mount_fleet(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FLEET_EXPOSITION))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stats/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STATS_BODY, "application/json"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(EVENT_STREAM_BODY, "text/event-stream"))
        .mount(server)
        .await;
}

fn start(server: &MockServer) -> (EngineHandle, tokio::task::JoinHandle<()>) {
    let (engine, handle) = Engine::new(mock_settings(server), test_client());
    (handle, tokio::spawn(engine.run()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engine_publishes_dashboard_view() {
    once_cell::sync::Lazy::force(&fleetwatch::logging::TEST_TRACING);
    let main_span = tracing::info_span!("test_engine_publishes_dashboard_view");
    let _ = main_span.enter();

    let server = MockServer::start().await;
    mount_fleet(&server).await;
    let (handle, engine) = start(&server);
    let mut rx_view = handle.subscribe();

    let view = wait_for(&mut rx_view, "scrape, stats and events", |v| {
        v.connections.get(&Probe::Metrics) == Some(&ConnectionStatus::Connected)
            && v.connections.get(&Probe::Stats) == Some(&ConnectionStatus::Connected)
            && !v.events.is_empty()
    })
    .await;

    assert_relative_eq!(view.queue_depth, 12.0);
    assert_relative_eq!(view.tasks_running, 3.0);
    assert_relative_eq!(view.worker_count, 2.0);
    assert_eq!(view.connections.get(&Probe::Health), Some(&ConnectionStatus::Disabled));
    assert_eq!(assert_some!(view.stats).workers.len(), 1);
    assert!(!view.auth_needed);

    let view = wait_for(&mut rx_view, "a second scrape", |v| v.throughput.is_finite()).await;
    assert_relative_eq!(view.throughput, 0.0);
    assert!(view.error_ratio.is_nan(), "no tasks processed between scrapes");

    handle.shutdown();
    assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(2), engine).await));
    assert!(handle.refresh().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engine_resubscribes_on_filter_change() {
    let server = MockServer::start().await;
    mount_fleet(&server).await;
    Mock::given(method("GET"))
        .and(path("/events/"))
        .and(query_param("worker_id", "w1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"type\":\"worker_heartbeat\",\"msg\":\"alive\",\"worker_id\":\"w1\"}\n\n",
            "text/event-stream",
        ))
        .with_priority(1)
        .mount(&server)
        .await;

    let (handle, engine) = start(&server);
    let mut rx_view = handle.subscribe();
    wait_for(&mut rx_view, "unfiltered events", |v| !v.events.is_empty()).await;

    assert_ok!(handle.set_event_filter("worker:w1 alive"));
    let view = wait_for(&mut rx_view, "filtered events", |v| {
        v.event_filter == "worker:w1 alive" && !v.events.is_empty()
    })
    .await;
    assert!(view.events.iter().all(|e| e.kind == "worker_heartbeat"));

    handle.shutdown();
    assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(2), engine).await));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engine_flags_auth_and_recovers_with_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .and(wiremock::matchers::header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FLEET_EXPOSITION))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(403))
        .with_priority(2)
        .mount(&server)
        .await;

    let mut settings = mock_settings(&server);
    settings.endpoints.stats_url = None;
    settings.endpoints.events_url = None;
    let (engine, handle) = Engine::new(settings, test_client());
    let engine = tokio::spawn(engine.run());
    let mut rx_view = handle.subscribe();

    let view = wait_for(&mut rx_view, "auth failure", |v| v.auth_needed).await;
    assert_eq!(view.connections.get(&Probe::Metrics), Some(&ConnectionStatus::Failed));
    assert!(view.last_errors.get(&Probe::Metrics).map_or(false, |e| e.contains("403")));

    assert_ok!(handle.set_bearer_token("t0ken"));
    let view = wait_for(&mut rx_view, "authorized scrape", |v| {
        !v.auth_needed && v.connections.get(&Probe::Metrics) == Some(&ConnectionStatus::Connected)
    })
    .await;
    assert!(view.last_errors.is_empty());

    handle.shutdown();
    assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(2), engine).await));
}
