use approx::assert_relative_eq;
use claim::*;
use fleetwatch::telemetry::{self, MetricCatalog, TelemetryError};
use fleetwatch::telemetry::{
    MC_CONCURRENCY_IN_USE, MC_LATENCY_P95, MC_QUEUE_DEPTH, MC_TASKS_FAILED_TOTAL, MC_TASKS_RUNNING, MC_TASKS_TOTAL,
    MC_WORKER_COUNT,
};
use maplit::hashmap;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::{mock_url, test_client, FLEET_EXPOSITION};

#[tokio::test]
async fn test_scrape_fleet_exposition() {
    once_cell::sync::Lazy::force(&fleetwatch::logging::TEST_TRACING);
    let main_span = tracing::info_span!("test_scrape_fleet_exposition");
    let _ = main_span.enter();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FLEET_EXPOSITION))
        .expect(1)
        .mount(&server)
        .await;

    let catalog = MetricCatalog::default();
    let snapshot = assert_ok!(telemetry::scrape(&test_client(), &mock_url(&server, "/metrics"), &catalog).await);

    assert_eq!(snapshot.values.len(), catalog.len());
    assert_relative_eq!(snapshot.value(MC_QUEUE_DEPTH), 12.0);
    assert_relative_eq!(snapshot.value(MC_TASKS_TOTAL), 100.0);
    assert_relative_eq!(snapshot.value(MC_TASKS_FAILED_TOTAL), 10.0);
    assert_relative_eq!(snapshot.value(MC_TASKS_RUNNING), 3.0);
    assert_relative_eq!(snapshot.value(MC_WORKER_COUNT), 2.0);
    assert_relative_eq!(snapshot.value(MC_LATENCY_P95), 0.5);
    assert!(snapshot.value(MC_CONCURRENCY_IN_USE).is_nan());
}

#[tokio::test]
async fn test_scrape_with_selector_overrides() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FLEET_EXPOSITION))
        .mount(&server)
        .await;

    let catalog = MetricCatalog::new(&hashmap! {
        MC_QUEUE_DEPTH.to_string() => r#"reproq_queue_depth{queue="emails"}"#.to_string(),
        "latency_sum".to_string() => "reproq_exec_duration_seconds".to_string(),
    });
    let snapshot = assert_ok!(telemetry::scrape(&test_client(), &mock_url(&server, "/metrics"), &catalog).await);
    assert_relative_eq!(snapshot.value(MC_QUEUE_DEPTH), 5.0);
    assert_relative_eq!(snapshot.value("latency_sum"), 25.5);
}

#[tokio::test]
async fn test_scrape_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/unauthorized"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# TYPE m gauge\nm{a=\"x\" 1\n"))
        .mount(&server)
        .await;

    let client = test_client();
    let catalog = MetricCatalog::default();

    let error = assert_err!(telemetry::scrape(&client, &mock_url(&server, "/unauthorized"), &catalog).await);
    assert!(assert_some!(error.as_client_error()).is_auth());

    let error = assert_err!(telemetry::scrape(&client, &mock_url(&server, "/garbled"), &catalog).await);
    assert!(matches!(error, TelemetryError::Exposition { line: 2, .. }));
}
