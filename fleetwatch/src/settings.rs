use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use validator::{Validate, ValidationError};

use crate::client::MetricLabel;

mod endpoint_settings;
mod event_settings;
mod telemetry_settings;

pub use endpoint_settings::EndpointSettings;
pub use event_settings::EventSettings;
pub use telemetry_settings::TelemetrySettings;

pub const DEFAULT_CONFIG_PATH: &str = "./resources/application.ron";
pub const ENV_PREFIX: &str = "FLEETWATCH";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[cfg_attr(test, derive(PartialEq))]
pub struct Settings {
    #[validate]
    pub endpoints: EndpointSettings,

    #[validate]
    pub telemetry: TelemetrySettings,

    #[validate]
    pub events: EventSettings,

    /// Bunyan log output; the dashboard owns the terminal.
    pub log_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: EndpointSettings::default(),
            telemetry: TelemetrySettings::default(),
            events: EventSettings::default(),
            log_file: PathBuf::from("fleetwatch.log"),
        }
    }
}

impl Settings {
    /// Layers the configuration file, `FLEETWATCH__` environment variables, and command line
    /// overrides, in increasing precedence.
    #[tracing::instrument(level = "info")]
    pub fn load(options: &CliOptions) -> Result<Self, SettingsError> {
        let config_path = options.config_path();
        tracing::info!(config_path=?config_path, "loading fleetwatch settings");

        let builder = Config::builder()
            .add_source(File::from(config_path.as_path()).required(options.config.is_some()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        let builder = options.load_overrides(builder)?;

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Parser, Clone, Debug, Default, PartialEq, Eq)]
#[clap(author, version, about)]
pub struct CliOptions {
    /// Configuration file to load. Default is ./resources/application.ron if present.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Override the metrics endpoint to scrape.
    #[clap(short, long)]
    pub metrics_url: Option<Url>,

    /// Override the Server-Sent Events endpoint.
    #[clap(short, long)]
    pub events_url: Option<Url>,

    /// Override the metrics poll interval in seconds.
    #[clap(short, long)]
    pub interval_secs: Option<u64>,
}

impl CliOptions {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH).to_path_buf())
    }

    pub fn load_overrides(
        &self, config: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, SettingsError> {
        let config = match &self.metrics_url {
            None => config,
            Some(url) => config.set_override("endpoints.metrics_url", url.as_str())?,
        };

        let config = match &self.events_url {
            None => config,
            Some(url) => config.set_override("endpoints.events_url", url.as_str())?,
        };

        let config = match self.interval_secs {
            None => config,
            Some(secs) => {
                let millis = Duration::from_secs(secs).as_millis() as i64;
                config.set_override("telemetry.poll_interval_millis", millis)?
            },
        };

        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl MetricLabel for SettingsError {
    fn label(&self) -> &'static str {
        match self {
            Self::Config(_) => "settings::config",
            Self::Validation(_) => "settings::validation",
        }
    }
}

pub(crate) fn validate_nonzero_duration(duration: &Duration) -> Result<(), ValidationError> {
    if duration.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;

    use claim::*;
    use once_cell::sync::Lazy;
    use pretty_assertions::assert_eq;

    use super::*;

    static SERIAL_ENV: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

    fn write_config(contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("fleetwatch-settings-{}.ron", std::process::id()));
        let mut file = assert_ok!(std::fs::File::create(&path));
        assert_ok!(file.write_all(contents.as_bytes()));
        path
    }

    #[test]
    fn test_load_defaults_without_file() {
        let _guard = SERIAL_ENV.lock().unwrap_or_else(|p| p.into_inner());
        let options = CliOptions {
            config: None,
            ..CliOptions::default()
        };
        let actual = assert_ok!(Settings::load(&options));
        assert_eq!(actual, Settings::default());
    }

    #[test]
    fn test_load_file_env_and_cli_layers() {
        let _guard = SERIAL_ENV.lock().unwrap_or_else(|p| p.into_inner());
        let path = write_config(
            r#"(
                endpoints: (
                    metrics_url: "http://worker-0:9100/metrics",
                    events_url: "http://web:8000/reproq/stream/",
                ),
                telemetry: ( poll_interval_millis: 1500, window_secs: 60 ),
                events: ( buffer_size: 25 ),
            )"#,
        );

        env::set_var("FLEETWATCH__EVENTS__CHANNEL_CAPACITY", "16");
        let options = CliOptions {
            config: Some(path.clone()),
            metrics_url: Some(assert_ok!(Url::parse("http://override:9100/metrics"))),
            interval_secs: Some(3),
            ..CliOptions::default()
        };
        let actual = Settings::load(&options);
        env::remove_var("FLEETWATCH__EVENTS__CHANNEL_CAPACITY");
        let _ = std::fs::remove_file(&path);

        let actual = assert_ok!(actual);
        assert_eq!(actual.endpoints.metrics_url.as_str(), "http://override:9100/metrics");
        assert_eq!(
            actual.endpoints.events_url.as_ref().map(|u| u.as_str()),
            Some("http://web:8000/reproq/stream/")
        );
        assert_eq!(actual.telemetry.poll_interval, Duration::from_secs(3));
        assert_eq!(actual.telemetry.window, Duration::from_secs(60));
        assert_eq!(actual.events.buffer_size, 25);
        assert_eq!(actual.events.channel_capacity, 16);
        assert_eq!(actual.events.backoff_max, Duration::from_secs(30));
    }

    #[test]
    fn test_load_rejects_invalid_settings() {
        let _guard = SERIAL_ENV.lock().unwrap_or_else(|p| p.into_inner());
        let path = write_config("(events: (buffer_size: 0))");
        let options = CliOptions { config: Some(path.clone()), ..CliOptions::default() };
        let actual = Settings::load(&options);
        let _ = std::fs::remove_file(&path);

        let error = assert_err!(actual);
        assert_eq!(error.label(), "settings::validation");
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let _guard = SERIAL_ENV.lock().unwrap_or_else(|p| p.into_inner());
        let options = CliOptions {
            config: Some(PathBuf::from("/nonexistent/fleetwatch.ron")),
            ..CliOptions::default()
        };
        let error = assert_err!(Settings::load(&options));
        assert_eq!(error.label(), "settings::config");
    }
}
