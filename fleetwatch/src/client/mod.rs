mod context;
mod error;

pub use context::{check_status, FleetClient, EVENT_STREAM_CONTENT_TYPE};
pub use error::{ClientError, MetricLabel};
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts};

#[allow(clippy::cognitive_complexity)]
pub(crate) fn log_response(label: &str, response: &reqwest::Response) {
    const PREAMBLE: &str = "fleet response received";
    let status = response.status();
    if status.is_success() || status.is_informational() {
        tracing::debug!(?response, "{PREAMBLE}: {label}");
    } else {
        tracing::warn!(?response, "{PREAMBLE}: {label}");
    }
}

pub static FLEET_PROBE_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "fleet_probe_time",
            "Time spent polling fleet health and stats endpoints in seconds",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.2, 0.3, 0.5, 1.0, 2.0, 5.0]),
        &["probe"],
    )
    .expect("failed creating fleet_probe_time metric")
});

#[inline]
pub(crate) fn start_probe_timer(probe: &str) -> HistogramTimer {
    FLEET_PROBE_TIME.with_label_values(&[probe]).start_timer()
}

pub static FLEET_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fleet_errors", "Number of errors observing the worker fleet"),
        &["action", "error_type"],
    )
    .expect("failed creating fleet_errors metric")
});

#[inline]
pub(crate) fn track_result<T, E>(action: &str, result: Result<T, E>, error_message: &str) -> Result<T, E>
where
    E: MetricLabel + std::fmt::Debug,
{
    if let Err(ref err) = result {
        tracing::error!(error=?err, %action, "{}", error_message);
        track_errors(action, err);
    }

    result
}

#[inline]
pub(crate) fn track_errors<E: MetricLabel>(action: &str, error: &E) {
    FLEET_ERRORS.with_label_values(&[action, error.label()]).inc()
}
