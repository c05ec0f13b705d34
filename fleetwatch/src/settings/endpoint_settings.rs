use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;
use validator::Validate;

use crate::client::ClientError;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[cfg_attr(test, derive(PartialEq))]
pub struct EndpointSettings {
    /// Prometheus exposition endpoint of the worker fleet.
    pub metrics_url: Url,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_url: Option<Url>,

    /// JSON stats endpoint published by the task-queue's web application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_url: Option<Url>,

    /// Server-Sent Events endpoint streaming task and worker events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_url: Option<Url>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,

    #[serde(rename = "timeout_millis")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[validate(custom = "super::validate_nonzero_duration")]
    pub timeout: Duration,

    pub insecure_skip_verify: bool,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            metrics_url: Self::default_metrics_url(),
            health_url: None,
            stats_url: None,
            events_url: None,
            headers: Vec::default(),
            timeout: Self::DEFAULT_TIMEOUT,
            insecure_skip_verify: false,
        }
    }
}

impl EndpointSettings {
    const DEFAULT_METRICS_URL: &'static str = "http://localhost:9100/metrics";
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    #[allow(clippy::missing_panics_doc)]
    pub fn default_metrics_url() -> Url {
        Url::parse(Self::DEFAULT_METRICS_URL).expect("default metrics url is valid")
    }

    pub fn header_map(&self) -> Result<HeaderMap, ClientError> {
        let mut result = HeaderMap::with_capacity(self.headers.len());

        for (k, v) in self.headers.iter() {
            let name = HeaderName::from_str(k.as_str()).map_err(|err| ClientError::InvalidHeader(err.to_string()))?;
            let value =
                HeaderValue::from_str(v.as_str()).map_err(|err| ClientError::InvalidHeader(err.to_string()))?;
            result.insert(name, value);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use claim::*;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_endpoint_settings_default() {
        let actual: EndpointSettings = assert_ok!(ron::from_str("()"));
        assert_eq!(actual, EndpointSettings::default());

        let actual: EndpointSettings = assert_ok!(ron::from_str(
            r#"(metrics_url: "http://worker-0:9100/metrics", timeout_millis: 750)"#
        ));
        assert_eq!(
            actual,
            EndpointSettings {
                metrics_url: assert_ok!(Url::parse("http://worker-0:9100/metrics")),
                timeout: Duration::from_millis(750),
                ..EndpointSettings::default()
            }
        );
    }

    #[test]
    fn test_header_map() {
        let settings = EndpointSettings {
            headers: vec![
                ("Authorization".to_string(), "Bearer abc".to_string()),
                ("X-Fleet".to_string(), "blue".to_string()),
            ],
            ..EndpointSettings::default()
        };

        let headers = assert_ok!(settings.header_map());
        assert_eq!(headers.len(), 2);
        assert_eq!(assert_some!(headers.get("authorization")), "Bearer abc");

        let bad = EndpointSettings {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..EndpointSettings::default()
        };
        assert_err!(bad.header_map());
    }
}
