use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// One observation of a canonical metric. A NaN or infinite value means "unavailable"; it is
/// never read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub const fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn is_available(&self) -> bool {
        self.value.is_finite()
    }
}

/// Result of one successful scrape: exactly one value per canonical catalog key. Absent data is
/// NaN, never omitted.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub collected_at: DateTime<Utc>,

    #[serde(rename = "latency_millis")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub latency: Duration,

    pub values: HashMap<String, f64>,
}

impl MetricSnapshot {
    /// The value for the key, or NaN when the key is unknown to the snapshot.
    pub fn value(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub level: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
    #[serde(rename = "latency_millis")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub latency: Duration,
}

/// Task counts keyed by status, e.g., `READY` -> 12.
pub type StatusCounts = HashMap<String, i64>;

/// JSON stats document published by the task-queue's web application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetStats {
    pub tasks: StatusCounts,
    pub queues: HashMap<String, StatusCounts>,
    pub workers: Vec<WorkerInfo>,
    pub periodic: Vec<PeriodicTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queue_controls: Vec<QueueControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_health: Option<WorkerHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerStatus>,
    pub top_failing: Vec<FailingTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<DatabaseStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub hostname: String,
    pub concurrency: i64,
    pub queues: Vec<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicTask {
    pub name: String,
    pub cron_expr: String,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueControl {
    pub queue_name: String,
    pub paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerHealth {
    pub alive: i64,
    pub dead: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerStatus {
    pub mode: String,
    pub low_memory: bool,
    pub beat_enabled: bool,
    pub beat_configured: bool,
    pub pg_cron_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailingTask {
    pub task_path: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseStats {
    pub alias: String,
    pub tasks: StatusCounts,
    pub queues: HashMap<String, StatusCounts>,
    pub workers: Vec<WorkerInfo>,
    pub periodic: Vec<PeriodicTask>,
}
