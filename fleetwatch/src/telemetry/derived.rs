//! Calculations over chronological sample windows. Counter decreases (resets) clamp to zero
//! movement rather than going negative.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::Sample;

/// Per-second increase between the first and last samples.
pub fn rate(samples: &[Sample]) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return f64::NAN;
    };
    if samples.len() < 2 {
        return f64::NAN;
    }

    let elapsed = (last.timestamp - first.timestamp).num_nanoseconds().map_or(f64::NAN, |n| n as f64 / 1e9);
    if elapsed.is_nan() || elapsed <= 0.0 {
        return f64::NAN;
    }

    clamp_reset(last.value - first.value) / elapsed
}

/// Increase between the first and last samples.
pub fn delta(samples: &[Sample]) -> f64 {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) if 2 <= samples.len() => clamp_reset(last.value - first.value),
        _ => f64::NAN,
    }
}

/// A decrease reads as zero movement; a NaN difference stays NaN.
pub(crate) fn clamp_reset(difference: f64) -> f64 {
    if difference < 0.0 {
        0.0
    } else {
        difference
    }
}

pub fn ratio(numerator: &[Sample], denominator: &[Sample]) -> f64 {
    let n = delta(numerator);
    let d = delta(denominator);
    if n.is_nan() || d.is_nan() || d == 0.0 {
        return f64::NAN;
    }
    n / d
}

/// Earliest timestamp inside the window ending at `now`; `None` for an empty window.
pub fn window_cutoff(window: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if window.is_zero() {
        return None;
    }

    chrono::Duration::from_std(window).ok().and_then(|w| now.checked_sub_signed(w))
}
