use std::time::Duration;

use claim::*;
use fleetwatch::client::FleetClient;
use fleetwatch::settings::Settings;
use url::Url;
use wiremock::MockServer;

pub const FLEET_EXPOSITION: &str = r#"# HELP reproq_queue_depth Tasks waiting to run.
# TYPE reproq_queue_depth gauge
reproq_queue_depth{queue="default"} 7
reproq_queue_depth{queue="emails"} 5
# HELP reproq_tasks_processed_total Tasks processed by outcome.
# TYPE reproq_tasks_processed_total counter
reproq_tasks_processed_total{status="success"} 90
reproq_tasks_processed_total{status="failure"} 10
# TYPE reproq_tasks_running gauge
reproq_tasks_running 3
# TYPE reproq_workers gauge
reproq_workers 2
# TYPE reproq_exec_duration_seconds histogram
reproq_exec_duration_seconds_bucket{le="0.1"} 50
reproq_exec_duration_seconds_bucket{le="0.2"} 80
reproq_exec_duration_seconds_bucket{le="0.5"} 95
reproq_exec_duration_seconds_bucket{le="1"} 100
reproq_exec_duration_seconds_bucket{le="+Inf"} 100
reproq_exec_duration_seconds_sum 25.5
reproq_exec_duration_seconds_count 100
"#;

pub const EVENT_STREAM_BODY: &str = ": connected\n\
data: {\"ts\":\"2024-01-01T12:00:00Z\",\"level\":\"info\",\"type\":\"task_started\",\"msg\":\"started\",\"queue\":\"emails\",\"task_id\":7}\n\
\n\
data: not json\n\
\n\
: keepalive\n\
data: {\"ts\":1704110401.25,\n\
data: \"level\":\"error\",\"type\":\"task_failed\",\"msg\":\"boom\",\"worker_id\":\"w1\"}\n\
\n";

pub const STATS_BODY: &str = r#"{
  "tasks": {"READY": 4, "WAITING": 1, "RUNNING": 2},
  "queues": {"emails": {"READY": 4, "FAILED": 1}},
  "workers": [{"worker_id": "w1", "hostname": "h1", "concurrency": 8, "queues": ["emails"], "version": "0.9"}],
  "periodic": [],
  "top_failing": []
}"#;

pub fn test_client() -> FleetClient {
    FleetClient::new(reqwest::Client::new(), Default::default(), Duration::from_secs(2))
}

pub fn mock_url(server: &MockServer, path: &str) -> Url {
    assert_ok!(Url::parse(&format!("{}{}", server.uri(), path)))
}

/// Settings pointed at the mock server with short intervals and backoff.
pub fn mock_settings(server: &MockServer) -> Settings {
    let mut settings = Settings::default();
    settings.endpoints.metrics_url = mock_url(server, "/metrics");
    settings.endpoints.stats_url = Some(mock_url(server, "/stats/"));
    settings.endpoints.events_url = Some(mock_url(server, "/events/"));
    settings.telemetry.poll_interval = Duration::from_millis(100);
    settings.telemetry.stats_interval = Duration::from_millis(200);
    settings.events.backoff_min = Duration::from_millis(20);
    settings.events.backoff_max = Duration::from_millis(100);
    settings
}
