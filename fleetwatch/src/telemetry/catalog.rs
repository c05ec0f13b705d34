use std::collections::HashMap;

use itertools::Itertools;
use once_cell::sync::Lazy;

use super::selector::{parse_selector, Selector};

pub const MC_QUEUE_DEPTH: &str = "queue_depth";
pub const MC_TASKS_TOTAL: &str = "tasks_total";
pub const MC_TASKS_FAILED_TOTAL: &str = "tasks_failed_total";
pub const MC_TASKS_RUNNING: &str = "tasks_running";
pub const MC_WORKER_COUNT: &str = "worker_count";
pub const MC_CONCURRENCY_IN_USE: &str = "concurrency_in_use";
pub const MC_CONCURRENCY_LIMIT: &str = "concurrency_limit";
pub const MC_LATENCY_P95: &str = "latency_p95";
pub const MC_WORKER_MEM_USAGE: &str = "worker_mem_usage";
pub const MC_DB_POOL_CONNECTIONS: &str = "db_pool_conns";
pub const MC_DB_POOL_WAIT: &str = "db_pool_wait";

/// Canonical key whose histogram or summary family yields its 0.95 quantile instead of a sum.
pub const LATENCY_QUANTILE_KEY: &str = MC_LATENCY_P95;
pub const LATENCY_QUANTILE: f64 = 0.95;

static DEFAULT_MAPPING: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    maplit::hashmap! {
        MC_QUEUE_DEPTH => "reproq_queue_depth",
        MC_TASKS_TOTAL => "reproq_tasks_processed_total",
        MC_TASKS_FAILED_TOTAL => r#"reproq_tasks_processed_total{status="failure"}"#,
        MC_TASKS_RUNNING => "reproq_tasks_running",
        MC_WORKER_COUNT => "reproq_workers",
        MC_CONCURRENCY_IN_USE => "reproq_concurrency_in_use",
        MC_CONCURRENCY_LIMIT => "reproq_concurrency_limit",
        MC_LATENCY_P95 => "reproq_exec_duration_seconds",
        MC_WORKER_MEM_USAGE => "reproq_worker_mem_usage_bytes",
        MC_DB_POOL_CONNECTIONS => "reproq_db_pool_connections_in_use",
        MC_DB_POOL_WAIT => "reproq_db_pool_wait_count_total",
    }
});

/// Maps canonical metric keys to provider selectors. Built once at engine start and owned by the
/// dashboard state.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCatalog {
    mapping: HashMap<String, String>,
    selectors: HashMap<String, Selector>,
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl MetricCatalog {
    /// Starts from the built-in mapping; only non-empty override values replace or add entries.
    pub fn new(overrides: &HashMap<String, String>) -> Self {
        let mut mapping: HashMap<String, String> = DEFAULT_MAPPING
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();

        for (key, value) in overrides {
            if !value.trim().is_empty() {
                mapping.insert(key.clone(), value.clone());
            }
        }

        let selectors = mapping.iter().map(|(k, v)| (k.clone(), parse_selector(v))).collect();
        Self { mapping, selectors }
    }

    /// Raw selector string for the key, or empty if unknown.
    pub fn name(&self, key: &str) -> &str {
        self.mapping.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn selector(&self, key: &str) -> Option<&Selector> {
        self.selectors.get(key)
    }

    /// Canonical keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.mapping.keys().map(String::as_str).sorted().collect()
    }

    pub fn selectors(&self) -> impl Iterator<Item = (&str, &Selector)> {
        self.selectors.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}
