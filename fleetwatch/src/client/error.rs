use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Label used for the `error_type` dimension of the error counters.
pub trait MetricLabel {
    fn label(&self) -> &'static str;
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("http status {code} for {url}")]
    Status { url: Url, code: StatusCode },

    #[error("invalid request header: {0}")]
    InvalidHeader(String),

    #[error("failed processing JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request to {0} failed to complete within timeout of {1:?}")]
    Timeout(Url, Duration),
}

impl ClientError {
    /// The HTTP status code carried by a status error.
    pub const fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_status(&self, codes: &[u16]) -> bool {
        self.status_code()
            .map_or(false, |code| codes.contains(&code.as_u16()))
    }

    /// Authentication was refused; the caller should trigger re-authentication.
    pub fn is_auth(&self) -> bool {
        self.is_status(&[401, 403])
    }

    /// The endpoint is not served by this fleet.
    pub fn is_not_found(&self) -> bool {
        self.is_status(&[404])
    }
}

impl MetricLabel for ClientError {
    fn label(&self) -> &'static str {
        match self {
            Self::Url { .. } => "http::url",
            Self::HttpRequest(err) if err.is_timeout() => "http::timeout",
            Self::HttpRequest(err) if err.is_connect() => "http::connect",
            Self::HttpRequest(_) => "http::request",
            Self::Status { code, .. } if code.is_client_error() => "http::status::client",
            Self::Status { .. } => "http::status::server",
            Self::InvalidHeader(_) => "http::header",
            Self::Json(_) => "http::json",
            Self::Timeout(_, _) => "http::timeout",
        }
    }
}
