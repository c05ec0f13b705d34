use std::cmp::Reverse;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use url::Url;

use crate::client::{log_response, start_probe_timer, track_result, ClientError, FleetClient};
use crate::model::{FleetStats, PeriodicTask, WorkerInfo};

const STATUS_READY: &str = "READY";
const STATUS_WAITING: &str = "WAITING";
const STATUS_WAITING_CALLBACK: &str = "WAITING_CALLBACK";
const STATUS_RUNNING: &str = "RUNNING";
const STATUS_FAILED: &str = "FAILED";

const MIN_WORKER_ACTIVE_WINDOW: Duration = Duration::from_secs(90);
const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Fetch the stats document. Any non-200 response is a status error.
#[tracing::instrument(level = "debug", skip(client))]
pub async fn fetch_stats(client: &FleetClient, url: &Url) -> Result<FleetStats, ClientError> {
    let _timer = start_probe_timer("stats");
    let result = do_fetch_stats(client, url).await;
    track_result("stats", result, "failed to fetch fleet stats")
}

async fn do_fetch_stats(client: &FleetClient, url: &Url) -> Result<FleetStats, ClientError> {
    let response = client.get(url).await?;
    log_response("stats", &response);
    let code = response.status();
    if code != reqwest::StatusCode::OK {
        return Err(ClientError::Status { url: url.clone(), code });
    }

    let body = response.bytes().await?;
    let mut stats: FleetStats = serde_json::from_slice(&body)?;
    stats.fetched_at = Some(Utc::now());
    Ok(stats)
}

/// Per-queue task counts rolled up by status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub name: String,
    pub total: i64,
    pub ready: i64,
    pub waiting: i64,
    pub running: i64,
    pub failed: i64,
}

impl FleetStats {
    /// Count for a task status; the status is matched case-insensitively. `None` when the
    /// document does not report it.
    pub fn task_count(&self, status: &str) -> Option<i64> {
        let key = status.trim().to_uppercase();
        if key.is_empty() {
            return None;
        }
        self.tasks.get(&key).copied()
    }

    /// WAITING plus WAITING_CALLBACK; `None` only when neither is reported.
    pub fn waiting_count(&self) -> Option<i64> {
        match (self.task_count(STATUS_WAITING), self.task_count(STATUS_WAITING_CALLBACK)) {
            (None, None) => None,
            (waiting, callback) => Some(waiting.unwrap_or(0) + callback.unwrap_or(0)),
        }
    }

    /// Queues served by the reporting workers, sorted and deduplicated.
    pub fn queue_names(&self) -> Vec<String> {
        self.workers
            .iter()
            .flat_map(|w| w.queues.iter())
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .sorted()
            .dedup()
            .map(str::to_string)
            .collect()
    }

    /// Largest queues first; ties ordered by name.
    pub fn queue_summaries(&self) -> Vec<QueueSummary> {
        self.queues
            .iter()
            .map(|(name, counts)| {
                let mut summary = QueueSummary { name: name.clone(), ..QueueSummary::default() };
                for (status, count) in counts {
                    match status.to_uppercase().as_str() {
                        STATUS_READY => summary.ready += count,
                        STATUS_WAITING | STATUS_WAITING_CALLBACK => summary.waiting += count,
                        STATUS_RUNNING => summary.running += count,
                        STATUS_FAILED => summary.failed += count,
                        _ => {},
                    }
                    summary.total += count;
                }
                summary
            })
            .sorted_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)))
            .collect()
    }

    /// Most recently seen first; workers never seen sort last.
    pub fn workers_by_recent(&self) -> Vec<WorkerInfo> {
        self.workers
            .iter()
            .cloned()
            .sorted_by_key(|w| Reverse(w.last_seen_at))
            .collect()
    }

    /// `(active, stale)` worker counts. A worker is stale if never seen or last seen before
    /// `now - max(90s, 6 * stats_interval)`.
    pub fn worker_status_counts(&self, now: DateTime<Utc>, stats_interval: Duration) -> (usize, usize) {
        let cutoff = worker_active_cutoff(now, stats_interval);
        let active = self
            .workers
            .iter()
            .filter(|w| w.last_seen_at.map_or(false, |seen| cutoff <= seen))
            .count();
        (active, self.workers.len() - active)
    }

    /// The enabled periodic task due soonest.
    pub fn next_periodic(&self) -> Option<&PeriodicTask> {
        self.periodic
            .iter()
            .filter(|p| p.enabled)
            .filter_map(|p| p.next_run_at.map(|at| (at, p)))
            .min_by_key(|(at, _)| *at)
            .map(|(_, p)| p)
    }
}

fn worker_active_cutoff(now: DateTime<Utc>, stats_interval: Duration) -> DateTime<Utc> {
    let interval = if stats_interval.is_zero() { DEFAULT_STATS_INTERVAL } else { stats_interval };
    let window = MIN_WORKER_ACTIVE_WINDOW.max(interval.saturating_mul(6));
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
