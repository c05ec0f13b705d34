use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use itertools::Itertools;
use url::Url;

use super::catalog::{MetricCatalog, LATENCY_QUANTILE, LATENCY_QUANTILE_KEY};
use super::error::TelemetryError;
use super::exposition::{parse_exposition, MetricFamily, MetricKind, Series, SeriesValue};
use super::selector::Selector;
use crate::client::{check_status, log_response, track_result, ClientError, FleetClient};
use crate::model::MetricSnapshot;

/// Fetch the exposition text and reduce it to one value per catalog key. Failures produce no
/// snapshot.
#[tracing::instrument(level = "debug", skip(client, catalog))]
pub async fn scrape(client: &FleetClient, url: &Url, catalog: &MetricCatalog) -> Result<MetricSnapshot, TelemetryError> {
    let _timer = super::start_scrape_timer();
    let result = do_scrape(client, url, catalog).await;
    track_result("scrape", result, "failed to scrape fleet metrics")
}

async fn do_scrape(client: &FleetClient, url: &Url, catalog: &MetricCatalog) -> Result<MetricSnapshot, TelemetryError> {
    let start = Instant::now();
    let response = client.get(url).await?;
    log_response("metrics scrape", &response);
    let response = check_status(url, response)?;
    let body = response.text().await.map_err(ClientError::from)?;

    let families = parse_exposition(&body)?;
    let values = extract_catalog(&families, catalog);
    tracing::debug!(nr_families=%families.len(), ?values, "scraped fleet metrics");

    Ok(MetricSnapshot { collected_at: Utc::now(), latency: start.elapsed(), values })
}

pub fn extract_catalog(families: &HashMap<String, MetricFamily>, catalog: &MetricCatalog) -> HashMap<String, f64> {
    catalog
        .selectors()
        .map(|(key, selector)| {
            let value = extract_value(families, selector, key == LATENCY_QUANTILE_KEY);
            (key.to_string(), value)
        })
        .collect()
}

fn extract_value(families: &HashMap<String, MetricFamily>, selector: &Selector, is_latency_quantile: bool) -> f64 {
    if selector.is_empty() {
        return f64::NAN;
    }
    let Some(family) = families.get(&selector.name) else {
        return f64::NAN;
    };

    let filtered: Vec<&Series> = family.series.iter().filter(|s| selector.matches(&s.labels)).collect();

    match family.kind {
        MetricKind::Gauge | MetricKind::Counter | MetricKind::Untyped => sum_scalars(&filtered),
        MetricKind::Summary if is_latency_quantile => {
            summary_quantile(&filtered, LATENCY_QUANTILE).unwrap_or_else(|| sum_of_sums(&filtered))
        },
        MetricKind::Histogram if is_latency_quantile => {
            histogram_quantile(&filtered, LATENCY_QUANTILE).unwrap_or_else(|| sum_of_sums(&filtered))
        },
        MetricKind::Summary | MetricKind::Histogram => sum_of_sums(&filtered),
        MetricKind::Other(_) => f64::NAN,
    }
}

fn sum_scalars(series: &[&Series]) -> f64 {
    series
        .iter()
        .map(|s| match s.value {
            SeriesValue::Scalar(value) => value,
            _ => 0.0,
        })
        .sum()
}

fn sum_of_sums(series: &[&Series]) -> f64 {
    series
        .iter()
        .map(|s| match s.value {
            SeriesValue::Summary { sum, .. } | SeriesValue::Histogram { sum, .. } => sum,
            SeriesValue::Scalar(_) => 0.0,
        })
        .sum()
}

/// Sample-count-weighted average of the requested quantile across series.
pub fn summary_quantile(series: &[&Series], quantile: f64) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total_count = 0.0;
    let mut found = false;

    for s in series {
        let SeriesValue::Summary { count, quantiles, .. } = &s.value else { continue };
        if let Some((_, value)) = quantiles.iter().find(|(q, _)| (*q - quantile).abs() < f64::EPSILON) {
            found = true;
            weighted += count * value;
            total_count += count;
        }
    }

    if !found || total_count == 0.0 {
        return None;
    }
    Some(weighted / total_count)
}

/// Merges cumulative bucket counts across series and interpolates within the first bucket that
/// reaches the target rank. Lower bound of every bucket is taken as zero.
pub fn histogram_quantile(series: &[&Series], quantile: f64) -> Option<f64> {
    let mut total_count = 0.0;
    let mut all_buckets = Vec::new();

    for s in series {
        let SeriesValue::Histogram { count, buckets, .. } = &s.value else { continue };
        let inf_count = buckets.iter().find(|(bound, _)| bound.is_infinite()).map(|(_, c)| *c);
        total_count += count.or(inf_count).unwrap_or(0.0);
        all_buckets.extend(buckets.iter().copied());
    }

    if total_count == 0.0 || all_buckets.is_empty() {
        return None;
    }

    let merged: Vec<(f64, f64)> = all_buckets
        .into_iter()
        .sorted_by(|(lhs, _), (rhs, _)| lhs.total_cmp(rhs))
        .coalesce(|(b1, c1), (b2, c2)| if b1 == b2 { Ok((b1, c1 + c2)) } else { Err(((b1, c1), (b2, c2))) })
        .collect();

    let target = total_count * quantile;
    let mut prev_count = 0.0;
    for (bound, count) in merged {
        if target <= count {
            if count == prev_count {
                return Some(bound);
            }
            return Some(bound * (target - prev_count) / (count - prev_count));
        }
        prev_count = count;
    }

    None
}
