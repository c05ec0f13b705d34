use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::model::Event;

/// Decode one record payload. Returns `None` when the payload is not a JSON object; only that
/// record is lost.
pub fn parse_event(payload: &str) -> Option<Event> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let fields = value.as_object()?;

    let timestamp = fields.get("ts").and_then(parse_timestamp).unwrap_or_else(Utc::now);

    Some(Event {
        timestamp,
        level: field_string(fields, "level"),
        kind: field_string(fields, "type"),
        message: field_string(fields, "msg"),
        queue: optional_field(fields, "queue"),
        task_id: optional_field(fields, "task_id"),
        worker_id: optional_field(fields, "worker_id"),
        metadata: metadata(fields),
    })
}

fn field_string(fields: &Map<String, Value>, key: &str) -> String {
    fields.get(key).map(coerce_string).unwrap_or_default()
}

fn optional_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    Some(field_string(fields, key)).filter(|s| !s.is_empty())
}

fn metadata(fields: &Map<String, Value>) -> HashMap<String, String> {
    match fields.get("metadata") {
        Some(Value::Object(meta)) => meta.iter().map(|(k, v)| (k.clone(), coerce_string(v))).collect(),
        _ => HashMap::new(),
    }
}

/// Strings pass through, numbers print without decimals, anything else is empty.
fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_f64().map(|n| format!("{n:.0}")).unwrap_or_default(),
        _ => String::new(),
    }
}

/// RFC 3339 text (with or without fractional seconds) or Unix epoch seconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text).ok().map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => {
            let epoch = n.as_f64().filter(|e| e.is_finite())?;
            let secs = epoch.trunc();
            let nanos = ((epoch - secs) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
            Utc.timestamp_opt(secs as i64, nanos).single()
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;
    use claim::*;
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_event_payload() {
        let payload = r#"{"ts":"2024-01-01T12:00:00Z","level":"warn","type":"task_failed","msg":"boom","queue":"default","task_id":"42","worker_id":"w1","metadata":{"attempt":"1","latency":250,"retry":true}}"#;
        let event = assert_some!(parse_event(payload));

        assert_eq!(event.level, "warn");
        assert_eq!(event.kind, "task_failed");
        assert_eq!(event.message, "boom");
        assert_eq!(event.queue.as_deref(), Some("default"));
        assert_eq!(event.task_id.as_deref(), Some("42"));
        assert_eq!(event.worker_id.as_deref(), Some("w1"));
        assert_eq!(
            event.metadata,
            hashmap! {
                "attempt".to_string() => "1".to_string(),
                "latency".to_string() => "250".to_string(),
                "retry".to_string() => String::new(),
            }
        );
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_event_unix_timestamp() {
        let event = assert_some!(parse_event(r#"{"ts":1700000000.5,"level":"info","type":"task","msg":"ok"}"#));
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
        assert_ne!(event.timestamp.nanosecond(), 0);
        assert_none!(event.queue);
    }

    #[test]
    fn test_parse_event_rfc3339_nanos_and_coercion() {
        let event = assert_some!(parse_event(
            r#"{"ts":"2024-01-01T12:00:00.123456789+02:00","task_id":1234,"level":null}"#
        ));
        assert_eq!(event.timestamp.nanosecond(), 123_456_789);
        assert_eq!(event.timestamp.hour(), 10);
        assert_eq!(event.task_id.as_deref(), Some("1234"));
        assert_eq!(event.level, "");
    }

    #[test]
    fn test_parse_event_missing_or_bad_ts_uses_now() {
        let before = Utc::now();
        let event = assert_some!(parse_event(r#"{"ts":"yesterday","msg":"x"}"#));
        assert!(before <= event.timestamp);
    }

    #[test]
    fn test_parse_event_invalid() {
        assert_none!(parse_event("{invalid"));
        assert_none!(parse_event("[1,2,3]"));
        assert_none!(parse_event(""));
    }
}
