use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use validator::Validate;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[cfg_attr(test, derive(PartialEq))]
pub struct TelemetrySettings {
    #[serde(rename = "poll_interval_millis")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[validate(custom = "super::validate_nonzero_duration")]
    pub poll_interval: Duration,

    #[serde(rename = "health_interval_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[validate(custom = "super::validate_nonzero_duration")]
    pub health_interval: Duration,

    #[serde(rename = "stats_interval_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[validate(custom = "super::validate_nonzero_duration")]
    pub stats_interval: Duration,

    /// Span of samples used by the derived calculations and the dashboard charts.
    #[serde(rename = "window_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub window: Duration,

    /// Widest window an operator can select; sizes the series ring buffers.
    #[serde(rename = "max_window_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub max_window: Duration,

    /// Canonical metric key -> selector overrides, e.g.,
    /// `queue_depth: "myapp_queue_depth{queue=\"default\"}"`.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            health_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(5),
            window: Duration::from_secs(5 * 60),
            max_window: Duration::from_secs(15 * 60),
            metrics: HashMap::default(),
        }
    }
}

impl TelemetrySettings {
    pub const MIN_SERIES_CAPACITY: usize = 30;
    const SERIES_CAPACITY_HEADROOM: usize = 5;

    /// Samples retained per series: enough to cover the widest window at the poll interval.
    pub fn series_capacity(&self) -> usize {
        let poll_millis = self.poll_interval.as_millis().max(1);
        let per_window = (self.max_window.as_millis() / poll_millis) as usize;
        (per_window + Self::SERIES_CAPACITY_HEADROOM).max(Self::MIN_SERIES_CAPACITY)
    }
}
