use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::error::TelemetryError;

const BUCKET_SUFFIX: &str = "_bucket";
const SUM_SUFFIX: &str = "_sum";
const COUNT_SUFFIX: &str = "_count";
const LE_LABEL: &str = "le";
const QUANTILE_LABEL: &str = "quantile";

#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Summary,
    Histogram,
    Untyped,
    #[strum(default)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    pub help: Option<String>,
    pub series: Vec<Series>,
}

impl MetricFamily {
    fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self { name: name.into(), kind, help: None, series: Vec::new() }
    }

    fn series_mut(&mut self, labels: BTreeMap<String, String>, empty: impl FnOnce() -> SeriesValue) -> &mut Series {
        let position = self.series.iter().position(|s| s.labels == labels);
        let idx = match position {
            Some(idx) => idx,
            None => {
                self.series.push(Series { labels, value: empty() });
                self.series.len() - 1
            },
        };
        &mut self.series[idx]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub value: SeriesValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Scalar(f64),
    Summary {
        sum: f64,
        count: f64,
        quantiles: Vec<(f64, f64)>,
    },
    Histogram {
        sum: f64,
        /// From the `_count` line, if present.
        count: Option<f64>,
        /// `(upper_bound, cumulative_count)` in exposition order.
        buckets: Vec<(f64, f64)>,
    },
}

impl SeriesValue {
    const fn empty_summary() -> Self {
        Self::Summary { sum: 0.0, count: 0.0, quantiles: Vec::new() }
    }

    const fn empty_histogram() -> Self {
        Self::Histogram { sum: 0.0, count: None, buckets: Vec::new() }
    }
}

/// Parses Prometheus text exposition into families keyed by name. Any malformed line fails the
/// whole document.
pub fn parse_exposition(text: &str) -> Result<HashMap<String, MetricFamily>, TelemetryError> {
    let mut parser = ExpositionParser::default();
    for (idx, line) in text.lines().enumerate() {
        parser
            .parse_line(line)
            .map_err(|message| TelemetryError::exposition(idx + 1, message))?;
    }
    Ok(parser.families)
}

#[derive(Debug, Default)]
struct ExpositionParser {
    families: HashMap<String, MetricFamily>,
    typed: HashSet<String>,
    described: HashSet<String>,
}

impl ExpositionParser {
    fn parse_line(&mut self, line: &str) -> Result<(), String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        match line.strip_prefix('#') {
            Some(comment) => self.parse_comment(comment),
            None => self.parse_sample_line(line),
        }
    }

    fn parse_comment(&mut self, comment: &str) -> Result<(), String> {
        let mut tokens = comment.trim_start().splitn(3, char::is_whitespace);
        let directive = tokens.next().unwrap_or_default();
        if directive != "HELP" && directive != "TYPE" {
            return Ok(());
        }

        let name = tokens.next().unwrap_or_default();
        if !is_metric_name(name) {
            return Err(format!("invalid metric name in {directive} line: {name:?}"));
        }
        let rest = tokens.next().unwrap_or_default().trim();

        if directive == "HELP" {
            if !self.described.insert(name.to_string()) {
                return Err(format!("second HELP line for metric {name}"));
            }
            let family = self
                .families
                .entry(name.to_string())
                .or_insert_with(|| MetricFamily::new(name, MetricKind::Untyped));
            family.help = Some(rest.to_string());
            return Ok(());
        }

        if rest.is_empty() {
            return Err(format!("missing type in TYPE line for metric {name}"));
        }
        if !self.typed.insert(name.to_string()) {
            return Err(format!("second TYPE line for metric {name}"));
        }

        let kind = MetricKind::from_str(rest.to_lowercase().as_str())
            .unwrap_or_else(|_| MetricKind::Other(rest.to_string()));
        let family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily::new(name, MetricKind::Untyped));
        if !family.series.is_empty() {
            return Err(format!("TYPE line for metric {name} after its samples"));
        }
        family.kind = kind;
        Ok(())
    }

    fn parse_sample_line(&mut self, line: &str) -> Result<(), String> {
        let sample = parse_sample(line)?;
        let (family_name, suffix) = self.resolve_family(&sample.name);

        let family = self
            .families
            .entry(family_name.to_string())
            .or_insert_with(|| MetricFamily::new(family_name, MetricKind::Untyped));

        let kind = family.kind.clone();
        let mut labels = sample.labels;
        match (&kind, suffix) {
            (MetricKind::Summary, None) => {
                let quantile = take_bound(&mut labels, QUANTILE_LABEL, &sample.name)?;
                if let SeriesValue::Summary { quantiles, .. } =
                    &mut family.series_mut(labels, SeriesValue::empty_summary).value
                {
                    quantiles.push((quantile, sample.value));
                }
            },
            (MetricKind::Summary, Some(SUM_SUFFIX)) | (MetricKind::Histogram, Some(SUM_SUFFIX)) => {
                match &mut family.series_mut(labels, || empty_for(&kind)).value {
                    SeriesValue::Summary { sum, .. } | SeriesValue::Histogram { sum, .. } => *sum = sample.value,
                    SeriesValue::Scalar(_) => {},
                }
            },
            (MetricKind::Summary, Some(COUNT_SUFFIX)) => {
                if let SeriesValue::Summary { count, .. } =
                    &mut family.series_mut(labels, SeriesValue::empty_summary).value
                {
                    *count = sample.value;
                }
            },
            (MetricKind::Histogram, Some(COUNT_SUFFIX)) => {
                if let SeriesValue::Histogram { count, .. } =
                    &mut family.series_mut(labels, SeriesValue::empty_histogram).value
                {
                    *count = Some(sample.value);
                }
            },
            (MetricKind::Histogram, Some(BUCKET_SUFFIX)) => {
                let bound = take_bound(&mut labels, LE_LABEL, &sample.name)?;
                if let SeriesValue::Histogram { buckets, .. } =
                    &mut family.series_mut(labels, SeriesValue::empty_histogram).value
                {
                    buckets.push((bound, sample.value));
                }
            },
            (MetricKind::Histogram, _) => {
                return Err(format!("histogram sample {} lacks a _bucket, _sum or _count suffix", sample.name));
            },
            _ => family.series.push(Series { labels, value: SeriesValue::Scalar(sample.value) }),
        }

        Ok(())
    }

    /// `foo_bucket` belongs to histogram `foo`; `foo_sum` and `foo_count` to histogram or summary
    /// `foo`. Any other sample is its own family.
    fn resolve_family<'n>(&self, name: &'n str) -> (&'n str, Option<&'static str>) {
        for suffix in [BUCKET_SUFFIX, SUM_SUFFIX, COUNT_SUFFIX] {
            let Some(base) = name.strip_suffix(suffix) else { continue };
            let accepts = match self.families.get(base).map(|f| &f.kind) {
                Some(MetricKind::Histogram) => true,
                Some(MetricKind::Summary) => suffix != BUCKET_SUFFIX,
                _ => false,
            };
            if accepts {
                return (base, Some(suffix));
            }
        }

        (name, None)
    }
}

fn empty_for(kind: &MetricKind) -> SeriesValue {
    match kind {
        MetricKind::Summary => SeriesValue::empty_summary(),
        _ => SeriesValue::empty_histogram(),
    }
}

fn take_bound(labels: &mut BTreeMap<String, String>, label: &str, name: &str) -> Result<f64, String> {
    let raw = labels
        .remove(label)
        .ok_or_else(|| format!("sample {name} is missing the {label} label"))?;
    parse_float(&raw).ok_or_else(|| format!("invalid {label} label value {raw:?} on {name}"))
}

#[derive(Debug, PartialEq)]
struct RawSample {
    name: String,
    labels: BTreeMap<String, String>,
    value: f64,
}

fn parse_sample(line: &str) -> Result<RawSample, String> {
    let name_end = line
        .char_indices()
        .find(|(idx, c)| !is_name_char(*c, *idx == 0))
        .map_or(line.len(), |(idx, _)| idx);
    let name = &line[..name_end];
    if name.is_empty() {
        return Err(format!("expected a metric name: {line:?}"));
    }

    let mut rest = line[name_end..].trim_start();
    let mut labels = BTreeMap::new();
    if let Some(body) = rest.strip_prefix('{') {
        let (parsed, remaining) = parse_labels(body)?;
        labels = parsed;
        rest = remaining;
    }

    let mut tokens = rest.split_whitespace();
    let raw_value = tokens.next().ok_or_else(|| format!("missing value for metric {name}"))?;
    let value = parse_float(raw_value).ok_or_else(|| format!("invalid value {raw_value:?} for metric {name}"))?;

    if let Some(timestamp) = tokens.next() {
        timestamp
            .parse::<i64>()
            .map_err(|_| format!("invalid timestamp {timestamp:?} for metric {name}"))?;
    }
    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected token {extra:?} after sample for metric {name}"));
    }

    Ok(RawSample { name: name.to_string(), labels, value })
}

/// Parses the label block following `{`; returns the labels and the text after the closing `}`.
fn parse_labels(body: &str) -> Result<(BTreeMap<String, String>, &str), String> {
    let mut labels = BTreeMap::new();
    let mut rest = body;

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let key_end = rest
            .char_indices()
            .find(|(idx, c)| !is_label_char(*c, *idx == 0))
            .map_or(rest.len(), |(idx, _)| idx);
        let key = &rest[..key_end];
        if key.is_empty() {
            return Err(format!("invalid label name at {rest:?}"));
        }

        rest = rest[key_end..].trim_start();
        rest = rest
            .strip_prefix('=')
            .ok_or_else(|| format!("expected '=' after label {key}"))?
            .trim_start();
        rest = rest
            .strip_prefix('"')
            .ok_or_else(|| format!("expected quoted value for label {key}"))?;

        let (value, after) = read_quoted(rest).ok_or_else(|| format!("unterminated value for label {key}"))?;
        if labels.insert(key.to_string(), value).is_some() {
            return Err(format!("duplicate label {key}"));
        }

        rest = after.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(format!("expected ',' or '}}' after label {key}"));
        }
    }
}

/// Reads up to the closing quote, resolving `\\`, `\"` and `\n`.
fn read_quoted(text: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = text.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Some((value, &text[idx + 1..])),
            '\\' => match chars.next()?.1 {
                'n' => value.push('\n'),
                other => value.push(other),
            },
            c => value.push(c),
        }
    }

    None
}

fn parse_float(raw: &str) -> Option<f64> {
    match raw {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        raw => raw.parse().ok(),
    }
}

fn is_metric_name(name: &str) -> bool {
    !name.is_empty() && name.char_indices().all(|(idx, c)| is_name_char(c, idx == 0))
}

const fn is_name_char(c: char, first: bool) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':' || (!first && c.is_ascii_digit())
}

const fn is_label_char(c: char, first: bool) -> bool {
    c.is_ascii_alphabetic() || c == '_' || (!first && c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use claim::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    use super::*;

    const PAYLOAD: &str = r#"# HELP reproq_queue_depth Queue depth
# TYPE reproq_queue_depth gauge
reproq_queue_depth 12
# HELP reproq_tasks_processed_total Total tasks processed
# TYPE reproq_tasks_processed_total counter
reproq_tasks_processed_total{status="success",queue="default"} 95
reproq_tasks_processed_total{status="failure",queue="default"} 5 1700000000000
# HELP reproq_exec_duration_seconds Task execution duration
# TYPE reproq_exec_duration_seconds histogram
reproq_exec_duration_seconds_bucket{le="0.1"} 50
reproq_exec_duration_seconds_bucket{le="0.2"} 80
reproq_exec_duration_seconds_bucket{le="0.5"} 95
reproq_exec_duration_seconds_bucket{le="1"} 100
reproq_exec_duration_seconds_bucket{le="+Inf"} 100
reproq_exec_duration_seconds_sum 12
reproq_exec_duration_seconds_count 100
"#;

    #[test]
    fn test_parse_families() {
        let families = assert_ok!(parse_exposition(PAYLOAD));
        assert_eq!(families.len(), 3);

        let depth = &families["reproq_queue_depth"];
        assert_eq!(depth.kind, MetricKind::Gauge);
        assert_eq!(depth.help.as_deref(), Some("Queue depth"));
        assert_eq!(depth.series.len(), 1);
        assert_eq!(depth.series[0].value, SeriesValue::Scalar(12.0));

        let processed = &families["reproq_tasks_processed_total"];
        assert_eq!(processed.kind, MetricKind::Counter);
        assert_eq!(
            processed.series[1].labels,
            btreemap! { "status".to_string() => "failure".to_string(), "queue".to_string() => "default".to_string() }
        );

        let latency = &families["reproq_exec_duration_seconds"];
        assert_eq!(latency.kind, MetricKind::Histogram);
        assert_eq!(latency.series.len(), 1);
        match &latency.series[0].value {
            SeriesValue::Histogram { sum, count, buckets } => {
                assert_eq!(*sum, 12.0);
                assert_eq!(*count, Some(100.0));
                assert_eq!(buckets.len(), 5);
                assert!(buckets[4].0.is_infinite());
            },
            other => panic!("unexpected series value: {other:?}"),
        }
    }

    #[test]
    fn test_parse_summary_groups_by_labels() {
        let text = r#"# TYPE rpc_seconds summary
rpc_seconds{queue="a",quantile="0.5"} 0.1
rpc_seconds{queue="a",quantile="0.95"} 0.4
rpc_seconds_sum{queue="a"} 20
rpc_seconds_count{queue="a"} 100
rpc_seconds{queue="b",quantile="0.95"} 0.8
rpc_seconds_count{queue="b"} 50
"#;
        let families = assert_ok!(parse_exposition(text));
        let family = &families["rpc_seconds"];
        assert_eq!(family.series.len(), 2);
        assert_eq!(
            family.series[0].value,
            SeriesValue::Summary { sum: 20.0, count: 100.0, quantiles: vec![(0.5, 0.1), (0.95, 0.4)] }
        );
        assert_eq!(
            family.series[1].value,
            SeriesValue::Summary { sum: 0.0, count: 50.0, quantiles: vec![(0.95, 0.8)] }
        );
    }

    #[test]
    fn test_untyped_samples_form_their_own_family() {
        let families = assert_ok!(parse_exposition("reproq_queue_depth 12\nfoo_sum 3\n"));
        assert_eq!(families["reproq_queue_depth"].kind, MetricKind::Untyped);
        assert_eq!(families["foo_sum"].series[0].value, SeriesValue::Scalar(3.0));
    }

    #[test]
    fn test_other_declared_types_are_kept() {
        let families = assert_ok!(parse_exposition("# TYPE build info\nbuild{version=\"1\"} 1\n"));
        assert_eq!(families["build"].kind, MetricKind::Other("info".to_string()));
    }

    #[test]
    fn test_special_values_and_escapes() {
        let text = "m{path=\"a\\\"b\\\\c\\nd\"} NaN\nn -Inf\n";
        let families = assert_ok!(parse_exposition(text));
        let m = &families["m"];
        assert_eq!(m.series[0].labels["path"], "a\"b\\c\nd");
        assert!(matches!(m.series[0].value, SeriesValue::Scalar(v) if v.is_nan()));
        assert_eq!(families["n"].series[0].value, SeriesValue::Scalar(f64::NEG_INFINITY));
    }

    #[test]
    fn test_malformed_lines_carry_line_number() {
        let cases = [
            ("# TYPE m gauge\nm{a=\"x\" 1\n", 2),
            ("m abc\n", 1),
            ("m 1\n# TYPE m gauge\n", 2),
            ("# TYPE m gauge\n# TYPE m counter\n", 2),
            ("\n\nm{a=x} 1\n", 3),
            ("# TYPE h histogram\nh_bucket 1\n", 2),
            ("m 1 notatimestamp\n", 1),
        ];

        for (text, expected_line) in cases {
            match assert_err!(parse_exposition(text), "text: {text:?}") {
                TelemetryError::Exposition { line, .. } => assert_eq!(line, expected_line, "text: {text:?}"),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }
}
