use claim::*;
use fleetwatch::health::fetch_health;
use fleetwatch::stats::fetch_stats;
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::{mock_url, test_client, STATS_BODY};

#[tokio::test]
async fn test_bearer_token_unlocks_stats() {
    once_cell::sync::Lazy::force(&fleetwatch::logging::TEST_TRACING);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stats/"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STATS_BODY, "application/json"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stats/"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = test_client();
    let url = mock_url(&server, "/stats/");

    let error = assert_err!(fetch_stats(&client, &url).await);
    assert!(error.is_auth());

    assert_ok!(client.set_bearer_token("s3cret"));
    assert!(client.has_header("Authorization"));
    let stats = assert_ok!(fetch_stats(&client, &url).await);
    assert_eq!(stats.task_count("READY"), Some(4));
    assert_eq!(stats.waiting_count(), Some(1));
    assert_eq!(stats.queue_names(), vec!["emails".to_string()]);
    assert_eq!(stats.queue_summaries()[0].failed, 1);

    client.clear_bearer_token();
    assert!(assert_err!(fetch_stats(&client, &url).await).is_auth());
}

#[tokio::test]
async fn test_health_reports_status_with_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(500).set_body_raw(
            r#"{"status":"degraded","message":"database unavailable"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let (status, error) = fetch_health(&test_client(), &mock_url(&server, "/healthz")).await;
    assert!(assert_some!(error).is_status(&[500]));
    assert!(!status.healthy);
    assert_eq!(status.status, "degraded");
    assert_eq!(status.message.as_deref(), Some("database unavailable"));
}
