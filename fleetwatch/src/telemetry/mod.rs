mod catalog;
mod derived;
mod error;
mod exposition;
mod ring;
mod scrape;
mod selector;
mod series;

pub use catalog::{MetricCatalog, LATENCY_QUANTILE, LATENCY_QUANTILE_KEY};
pub use catalog::{
    MC_CONCURRENCY_IN_USE, MC_CONCURRENCY_LIMIT, MC_DB_POOL_CONNECTIONS, MC_DB_POOL_WAIT, MC_LATENCY_P95,
    MC_QUEUE_DEPTH, MC_TASKS_FAILED_TOTAL, MC_TASKS_RUNNING, MC_TASKS_TOTAL, MC_WORKER_COUNT, MC_WORKER_MEM_USAGE,
};
pub use derived::{delta, rate, ratio, window_cutoff};
pub use error::TelemetryError;
pub use exposition::{parse_exposition, MetricFamily, MetricKind, Series, SeriesValue};
use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramTimer};
pub use ring::RingBuffer;
pub use scrape::{extract_catalog, histogram_quantile, scrape, summary_quantile};
pub use selector::{parse_selector, Selector};
pub use series::{MetricSeries, SERIES_ERRORS, SERIES_THROUGHPUT};

pub static FLEET_SCRAPE_TIME: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "fleet_scrape_time",
            "Time spent scraping and extracting fleet metrics in seconds",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.2, 0.3, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("failed creating fleet_scrape_time metric")
});

#[inline]
fn start_scrape_timer() -> HistogramTimer {
    FLEET_SCRAPE_TIME.start_timer()
}
