use std::time::Instant;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::client::{log_response, start_probe_timer, track_errors, ClientError, FleetClient};
use crate::model::HealthStatus;

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HealthPayload {
    status: String,
    version: String,
    build: String,
    commit: String,
    message: String,
}

/// Poll the health endpoint.
///
/// A response is always described by the returned `HealthStatus`, even when the status code is an
/// error, so the dashboard can show what the server said. The `ClientError` is set for transport
/// failures and for status codes of 400 and above.
#[tracing::instrument(level = "debug", skip(client))]
pub async fn fetch_health(client: &FleetClient, url: &Url) -> (HealthStatus, Option<ClientError>) {
    let _timer = start_probe_timer("health");
    let started = Instant::now();

    let response = match client.get(url).await {
        Ok(response) => response,
        Err(error) => {
            track_errors("health", &error);
            return (unreachable_status(started), Some(error));
        },
    };
    log_response("health", &response);

    let code = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map_or(false, |ct| ct.contains(JSON_CONTENT_TYPE));
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(error) => {
            tracing::debug!(?error, "failed reading health body; judging by status code");
            Default::default()
        },
    };

    let mut status = HealthStatus {
        healthy: code == StatusCode::OK,
        status: code.canonical_reason().unwrap_or_default().to_lowercase(),
        version: None,
        build: None,
        commit: None,
        message: None,
        checked_at: Utc::now(),
        latency: started.elapsed(),
    };

    if !body.is_empty() && (is_json || body[0] == b'{') {
        match serde_json::from_slice::<HealthPayload>(&body) {
            Ok(payload) => apply_payload(&mut status, payload),
            Err(error) => tracing::debug!(?error, "health body is not a health document"),
        }
    }

    if code.is_client_error() || code.is_server_error() {
        let error = ClientError::Status { url: url.clone(), code };
        track_errors("health", &error);
        return (status, Some(error));
    }

    (status, None)
}

fn apply_payload(status: &mut HealthStatus, payload: HealthPayload) {
    status.status = payload.status.to_lowercase();
    status.version = non_empty(payload.version);
    status.build = non_empty(payload.build);
    status.commit = non_empty(payload.commit);
    status.message = non_empty(payload.message);
    if status.status == "ok" || status.status == "healthy" {
        status.healthy = true;
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

fn unreachable_status(started: Instant) -> HealthStatus {
    HealthStatus {
        healthy: false,
        status: String::new(),
        version: None,
        build: None,
        commit: None,
        message: None,
        checked_at: Utc::now(),
        latency: started.elapsed(),
    }
}
