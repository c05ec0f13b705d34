use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::catalog::{MetricCatalog, MC_QUEUE_DEPTH, MC_TASKS_FAILED_TOTAL, MC_TASKS_TOTAL};
use super::derived::{clamp_reset, ratio, window_cutoff};
use super::ring::RingBuffer;
use crate::model::{MetricSnapshot, Sample};

/// Per-second rate of `tasks_total`, derived from consecutive scrapes.
pub const SERIES_THROUGHPUT: &str = "throughput";

/// Per-second rate of `tasks_failed_total`, derived from consecutive scrapes.
pub const SERIES_ERRORS: &str = "errors";

const DERIVED_COUNTERS: [(&str, &str); 2] = [(MC_TASKS_TOTAL, SERIES_THROUGHPUT), (MC_TASKS_FAILED_TOTAL, SERIES_ERRORS)];

/// One fixed-capacity ring buffer per catalog key plus the derived rate series.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    capacity: usize,
    buffers: HashMap<String, RingBuffer<Sample>>,
    last_counters: HashMap<String, Sample>,
}

impl MetricSeries {
    pub fn new(catalog: &MetricCatalog, capacity: usize) -> Self {
        let buffers = catalog
            .keys()
            .into_iter()
            .chain([SERIES_THROUGHPUT, SERIES_ERRORS])
            .map(|key| (key.to_string(), RingBuffer::new(capacity)))
            .collect();

        Self { capacity, buffers, last_counters: HashMap::new() }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer(&self, key: &str) -> Option<&RingBuffer<Sample>> {
        self.buffers.get(key)
    }

    /// Records every available value of the snapshot, then extends the derived rate series.
    pub fn apply_snapshot(&mut self, snapshot: &MetricSnapshot) {
        let ts = snapshot.collected_at;
        for (key, value) in snapshot.values.iter() {
            if !value.is_finite() {
                continue;
            }
            if let Some(buffer) = self.buffers.get_mut(key) {
                buffer.add(Sample::new(ts, *value));
            }
        }

        for (counter, derived) in DERIVED_COUNTERS {
            self.update_counter_rate(counter, derived, ts);
        }
    }

    fn update_counter_rate(&mut self, counter: &str, derived: &str, ts: DateTime<Utc>) {
        let Some(latest) = self.buffers.get(counter).and_then(|b| b.latest()).copied() else {
            return;
        };

        if let Some(prev) = self.last_counters.get(counter) {
            let elapsed = (latest.timestamp - prev.timestamp).num_milliseconds() as f64 / 1_000.0;
            if 0.0 < elapsed {
                let rate = clamp_reset(latest.value - prev.value) / elapsed;
                if let Some(buffer) = self.buffers.get_mut(derived) {
                    buffer.add(Sample::new(ts, rate));
                }
            }
        }

        self.last_counters.insert(counter.to_string(), latest);
    }

    /// Samples of the key inside the window ending at `now`; empty for an unknown key.
    pub fn window(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Vec<Sample> {
        self.buffers
            .get(key)
            .map(|b| b.values_since(window_cutoff(window, now)))
            .unwrap_or_default()
    }

    pub fn latest_value(&self, key: &str) -> f64 {
        self.buffers
            .get(key)
            .and_then(|b| b.latest())
            .map_or(f64::NAN, |s| s.value)
    }

    /// Most recent derived throughput within the window.
    pub fn throughput(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        self.window(SERIES_THROUGHPUT, window, now).last().map_or(f64::NAN, |s| s.value)
    }

    /// Fraction of processed tasks that failed over the window.
    pub fn error_ratio(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        ratio(
            &self.window(MC_TASKS_FAILED_TOTAL, window, now),
            &self.window(MC_TASKS_TOTAL, window, now),
        )
    }

    pub fn success_ratio(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        let errors = self.error_ratio(window, now);
        if errors.is_nan() {
            return f64::NAN;
        }
        1.0 - errors
    }

    /// Change in queue depth across the window; positive means a growing backlog.
    pub fn queue_trend(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        let samples = self.window(MC_QUEUE_DEPTH, window, now);
        match (samples.first(), samples.last()) {
            (Some(first), Some(last)) if 2 <= samples.len() => last.value - first.value,
            _ => f64::NAN,
        }
    }
}
