use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use validator::{Validate, ValidationError};

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[cfg_attr(test, derive(PartialEq, Eq))]
#[validate(schema(function = "validate_backoff_bounds"))]
pub struct EventSettings {
    #[serde(rename = "backoff_min_millis")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[validate(custom = "super::validate_nonzero_duration")]
    pub backoff_min: Duration,

    #[serde(rename = "backoff_max_millis")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff_max: Duration,

    /// Number of recent events retained for display.
    #[validate(range(min = 1))]
    pub buffer_size: usize,

    /// Capacity of the channel between the stream listener and the engine.
    #[validate(range(min = 1))]
    pub channel_capacity: usize,

    /// Initial filter expression, e.g., `queue:emails failed`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filter: String,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            buffer_size: 200,
            channel_capacity: 64,
            filter: String::default(),
        }
    }
}

fn validate_backoff_bounds(settings: &EventSettings) -> Result<(), ValidationError> {
    if settings.backoff_max < settings.backoff_min {
        let mut error = ValidationError::new("backoff_bounds");
        error.message = Some("backoff_max must not be less than backoff_min".into());
        return Err(error);
    }
    Ok(())
}
