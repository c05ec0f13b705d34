use thiserror::Error;

use crate::client::{ClientError, MetricLabel};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("failed to parse metrics exposition at line {line}: {message}")]
    Exposition { line: usize, message: String },
}

impl TelemetryError {
    pub fn exposition(line: usize, message: impl Into<String>) -> Self {
        Self::Exposition { line, message: message.into() }
    }

    pub fn as_client_error(&self) -> Option<&ClientError> {
        match self {
            Self::Client(err) => Some(err),
            Self::Exposition { .. } => None,
        }
    }
}

impl MetricLabel for TelemetryError {
    fn label(&self) -> &'static str {
        match self {
            Self::Client(err) => err.label(),
            Self::Exposition { .. } => "telemetry::exposition",
        }
    }
}
