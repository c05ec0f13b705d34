use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use rand::Rng;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::decode::parse_event;
use super::frame::SseDecoder;
use crate::client::{check_status, log_response, track_errors, ClientError, FleetClient};
use crate::model::Event;
use crate::settings::EventSettings;

pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Exponential reconnect delay. Each failed attempt returns the current delay and doubles it up to
/// `max`; a session that was established resets it to `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_MIN, DEFAULT_BACKOFF_MAX)
    }
}

impl Backoff {
    /// Zero bounds fall back to the defaults; `max` is never below `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = if min.is_zero() { DEFAULT_BACKOFF_MIN } else { min };
        let max = if max.is_zero() { DEFAULT_BACKOFF_MAX } else { max };
        let max = max.max(min);
        Self { min, max, current: min }
    }

    pub const fn current(&self) -> Duration {
        self.current
    }

    pub fn fail(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        wait
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Opens one streaming session and publishes its decoded events.
#[async_trait]
pub trait Connector: Send + Sync {
    /// `Ok` once an established stream has ended for any reason; `Err` only when the stream
    /// could not be established.
    async fn connect(&self, url: &Url, out: &mpsc::Sender<Event>, cancel: &CancellationToken) -> Result<(), ClientError>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Returns `false` if cancelled before the wait elapsed.
    async fn sleep(&self, wait: Duration, cancel: &CancellationToken) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, wait: Duration, cancel: &CancellationToken) -> bool {
        if wait.is_zero() {
            return !cancel.is_cancelled();
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

pub type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Uniform in `[0, base / 2]`.
pub fn default_jitter(base: Duration) -> Duration {
    let half = base.as_nanos() / 2;
    if half == 0 {
        return Duration::ZERO;
    }
    let half = u64::try_from(half).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::thread_rng().gen_range(0..=half))
}

#[derive(Clone)]
pub struct ListenOptions {
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub jitter: JitterFn,
    pub sleeper: Arc<dyn Sleeper>,
    pub connector: Arc<dyn Connector>,
}

impl fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenOptions")
            .field("backoff_min", &self.backoff_min)
            .field("backoff_max", &self.backoff_max)
            .finish()
    }
}

impl ListenOptions {
    pub fn new(client: FleetClient) -> Self {
        Self {
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
            jitter: Arc::new(default_jitter),
            sleeper: Arc::new(TokioSleeper),
            connector: Arc::new(HttpConnector::new(client)),
        }
    }

    pub fn from_settings(client: FleetClient, settings: &EventSettings) -> Self {
        Self::new(client).with_backoff(settings.backoff_min, settings.backoff_max)
    }

    pub fn with_backoff(self, min: Duration, max: Duration) -> Self {
        Self { backoff_min: min, backoff_max: max, ..self }
    }

    pub fn with_jitter(self, jitter: impl Fn(Duration) -> Duration + Send + Sync + 'static) -> Self {
        Self { jitter: Arc::new(jitter), ..self }
    }

    pub fn with_sleeper(self, sleeper: impl Sleeper + 'static) -> Self {
        Self { sleeper: Arc::new(sleeper), ..self }
    }

    pub fn with_connector(self, connector: impl Connector + 'static) -> Self {
        Self { connector: Arc::new(connector), ..self }
    }
}

/// Stream events from `url` into `out` until cancelled, reconnecting with the default backoff.
pub async fn listen(client: FleetClient, url: Url, out: mpsc::Sender<Event>, cancel: CancellationToken) {
    listen_with_options(url, out, cancel, ListenOptions::new(client)).await
}

#[tracing::instrument(level = "info", skip(url, out, cancel, options), fields(url=%url))]
pub async fn listen_with_options(url: Url, out: mpsc::Sender<Event>, cancel: CancellationToken, options: ListenOptions) {
    let mut backoff = Backoff::new(options.backoff_min, options.backoff_max);

    loop {
        if cancel.is_cancelled() || out.is_closed() {
            break;
        }

        let outcome = options.connector.connect(&url, &out, &cancel).await;
        if cancel.is_cancelled() || out.is_closed() {
            break;
        }

        // an ended session waits `min` without advancing the backoff
        let base = match outcome {
            Ok(()) => {
                backoff.reset();
                tracing::info!("event stream ended");
                backoff.current()
            },
            Err(error) => {
                track_errors("event_stream", &error);
                tracing::warn!(?error, "event stream connection failed");
                backoff.fail()
            },
        };

        let wait = base + (options.jitter)(base);
        tracing::info!(?wait, "backing off before reconnecting event stream");
        if !options.sleeper.sleep(wait, &cancel).await {
            break;
        }

        super::EVENT_STREAM_RECONNECTS.inc();
    }

    tracing::info!("event stream listener stopped");
}

/// Server-Sent Events over a long-lived HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: FleetClient,
}

impl HttpConnector {
    pub const fn new(client: FleetClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, url: &Url, out: &mpsc::Sender<Event>, cancel: &CancellationToken) -> Result<(), ClientError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            response = self.client.open_stream(url) => response?,
        };
        log_response("event stream", &response);
        let response = check_status(url, response)?;

        tracing::info!(%url, "event stream connected");
        super::EVENT_STREAM_CONNECTED.set(1);
        read_stream(response, out, cancel).await;
        super::EVENT_STREAM_CONNECTED.set(0);
        Ok(())
    }
}

async fn read_stream(response: reqwest::Response, out: &mpsc::Sender<Event>, cancel: &CancellationToken) {
    let body = response
        .bytes_stream()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
    let mut lines = StreamReader::new(Box::pin(body)).lines();
    let mut decoder = SseDecoder::new();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                if let Some(payload) = decoder.push_line(&line) {
                    if !publish(&payload, out, cancel).await {
                        return;
                    }
                }
            },
            Ok(None) => {
                if let Some(payload) = decoder.finish() {
                    publish(&payload, out, cancel).await;
                }
                tracing::debug!("event stream closed by server");
                return;
            },
            Err(error) => {
                if let Some(payload) = decoder.finish() {
                    publish(&payload, out, cancel).await;
                }
                tracing::warn!(?error, "event stream dropped");
                return;
            },
        }
    }
}

/// Returns `false` when the consumer is gone or the listener is cancelled.
async fn publish(payload: &str, out: &mpsc::Sender<Event>, cancel: &CancellationToken) -> bool {
    let Some(event) = parse_event(payload) else {
        tracing::debug!(%payload, "discarding undecodable event record");
        super::EVENT_STREAM_RECORDS.with_label_values(&["discarded"]).inc();
        return true;
    };

    super::EVENT_STREAM_RECORDS.with_label_values(&["decoded"]).inc();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = out.send(event) => sent.is_ok(),
    }
}
