use std::time::Duration;

use claim::*;
use fleetwatch::client::FleetClient;
use fleetwatch::events::{self, Connector, EventFilter, HttpConnector, ListenOptions};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::{mock_url, test_client, EVENT_STREAM_BODY};

fn sse_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(EVENT_STREAM_BODY, "text/event-stream")
}

#[tokio::test]
async fn test_http_connector_decodes_stream() {
    once_cell::sync::Lazy::force(&fleetwatch::logging::TEST_TRACING);
    let main_span = tracing::info_span!("test_http_connector_decodes_stream");
    let _ = main_span.enter();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events/"))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse_response())
        .expect(1)
        .mount(&server)
        .await;

    let connector = HttpConnector::new(test_client());
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    assert_ok!(connector.connect(&mock_url(&server, "/events/"), &tx, &cancel).await);
    drop(tx);

    let first = assert_some!(rx.recv().await);
    assert_eq!(first.kind, "task_started");
    assert_eq!(first.queue.as_deref(), Some("emails"));
    assert_eq!(first.task_id.as_deref(), Some("7"));

    let second = assert_some!(rx.recv().await);
    assert_eq!(second.level, "error");
    assert_eq!(second.message, "boom");
    assert_eq!(second.worker_id.as_deref(), Some("w1"));
    assert_eq!(second.timestamp.timestamp(), 1_704_110_401);

    assert_none!(rx.recv().await);
}

#[tokio::test]
async fn test_http_connector_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let connector = HttpConnector::new(test_client());
    let (tx, _rx) = mpsc::channel(8);
    let error = assert_err!(connector.connect(&mock_url(&server, "/events/"), &tx, &CancellationToken::new()).await);
    assert!(error.is_status(&[503]));
}

#[tokio::test]
async fn test_listen_streams_filtered_url_and_reconnects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events/"))
        .and(query_param("queue", "emails"))
        .respond_with(sse_response())
        .mount(&server)
        .await;

    let filter = EventFilter::parse("queue:emails");
    let url = filter.events_url(&mock_url(&server, "/events/"));
    let options = ListenOptions::new(test_client())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
        .with_jitter(|_| Duration::ZERO);

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let listener = tokio::spawn(events::listen_with_options(url, tx, cancel.clone(), options));

    let mut messages = Vec::new();
    while messages.len() < 4 {
        let event = assert_ok!(tokio::time::timeout(Duration::from_secs(5), rx.recv()).await);
        messages.push(assert_some!(event).message);
    }
    assert_eq!(messages, vec!["started", "boom", "started", "boom"]);

    cancel.cancel();
    assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(2), listener).await));
}

#[tokio::test]
async fn test_listen_cancelled_while_connecting() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events/"))
        .respond_with(sse_response().set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = FleetClient::new(reqwest::Client::new(), Default::default(), Duration::from_secs(60));
    let (tx, _rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let listener = tokio::spawn(events::listen(client, mock_url(&server, "/events/"), tx, cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    assert_ok!(assert_ok!(tokio::time::timeout(Duration::from_secs(2), listener).await));
}
