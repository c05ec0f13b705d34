use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::Display;

use crate::client::ClientError;
use crate::events::{EventBuffer, EventFilter};
use crate::model::{Event, FleetStats, HealthStatus, MetricSnapshot};
use crate::settings::Settings;
use crate::telemetry::{
    MetricCatalog, MetricSeries, TelemetryError, MC_QUEUE_DEPTH, MC_TASKS_RUNNING, MC_WORKER_COUNT, SERIES_ERRORS,
    SERIES_THROUGHPUT,
};

/// The fleet sources the dashboard observes.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    Metrics,
    Health,
    Stats,
    Events,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No endpoint configured.
    Disabled,
    /// Configured, but no result yet.
    Pending,
    Connected,
    Failed,
}

/// Transitions applied to the dashboard state, in inbox order.
#[derive(Debug)]
pub enum DashboardUpdate {
    Scraped(Result<MetricSnapshot, TelemetryError>),
    HealthChecked(HealthStatus, Option<ClientError>),
    StatsFetched(Result<FleetStats, ClientError>),
    Event(Event),
    /// `restarted` is set when the new filter changed the stream URL and the stream was reopened.
    FilterChanged { filter: EventFilter, restarted: bool },
    Authenticated,
}

impl DashboardUpdate {
    /// The probe whose poll produced this update, if any.
    pub const fn probe(&self) -> Option<Probe> {
        match self {
            Self::Scraped(_) => Some(Probe::Metrics),
            Self::HealthChecked(..) => Some(Probe::Health),
            Self::StatsFetched(_) => Some(Probe::Stats),
            Self::Event(_) => Some(Probe::Events),
            Self::FilterChanged { .. } | Self::Authenticated => None,
        }
    }
}

/// Everything the dashboard knows. Owned and mutated only by the engine task.
#[derive(Debug)]
pub struct DashboardState {
    catalog: MetricCatalog,
    series: MetricSeries,
    events: EventBuffer,
    filter: EventFilter,
    window: Duration,
    stats_interval: Duration,
    last_snapshot: Option<MetricSnapshot>,
    last_scrape_at: Option<DateTime<Utc>>,
    last_health: Option<HealthStatus>,
    last_stats: Option<FleetStats>,
    connections: BTreeMap<Probe, ConnectionStatus>,
    last_errors: BTreeMap<Probe, String>,
    auth_needed: bool,
}

impl DashboardState {
    pub fn new(settings: &Settings) -> Self {
        let catalog = MetricCatalog::new(&settings.telemetry.metrics);
        let series = MetricSeries::new(&catalog, settings.telemetry.series_capacity());
        let endpoints = &settings.endpoints;

        let configured = |present: bool| {
            if present {
                ConnectionStatus::Pending
            } else {
                ConnectionStatus::Disabled
            }
        };
        let connections = maplit::btreemap! {
            Probe::Metrics => ConnectionStatus::Pending,
            Probe::Health => configured(endpoints.health_url.is_some()),
            Probe::Stats => configured(endpoints.stats_url.is_some()),
            Probe::Events => configured(endpoints.events_url.is_some()),
        };

        Self {
            catalog,
            series,
            events: EventBuffer::new(settings.events.buffer_size),
            filter: EventFilter::parse(&settings.events.filter),
            window: settings.telemetry.window.min(settings.telemetry.max_window),
            stats_interval: settings.telemetry.stats_interval,
            last_snapshot: None,
            last_scrape_at: None,
            last_health: None,
            last_stats: None,
            connections,
            last_errors: BTreeMap::new(),
            auth_needed: false,
        }
    }

    pub const fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub const fn series(&self) -> &MetricSeries {
        &self.series
    }

    pub const fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub const fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub const fn auth_needed(&self) -> bool {
        self.auth_needed
    }

    pub fn connection(&self, probe: Probe) -> ConnectionStatus {
        self.connections.get(&probe).copied().unwrap_or(ConnectionStatus::Disabled)
    }

    pub fn last_error(&self, probe: Probe) -> Option<&str> {
        self.last_errors.get(&probe).map(String::as_str)
    }

    pub fn apply(&mut self, update: DashboardUpdate) {
        match update {
            DashboardUpdate::Scraped(Ok(snapshot)) => {
                self.series.apply_snapshot(&snapshot);
                self.last_scrape_at = Some(snapshot.collected_at);
                self.last_snapshot = Some(snapshot);
                self.auth_needed = false;
                self.succeeded(Probe::Metrics);
            },
            DashboardUpdate::Scraped(Err(error)) => {
                self.last_scrape_at = Some(Utc::now());
                if error.as_client_error().map_or(false, ClientError::is_auth) {
                    self.auth_needed = true;
                }
                self.failed(Probe::Metrics, &error);
            },
            DashboardUpdate::HealthChecked(status, error) => {
                self.last_health = Some(status);
                match error {
                    None => self.succeeded(Probe::Health),
                    Some(error) => self.client_failed(Probe::Health, &error),
                }
            },
            DashboardUpdate::StatsFetched(Ok(stats)) => {
                self.last_stats = Some(stats);
                self.succeeded(Probe::Stats);
            },
            DashboardUpdate::StatsFetched(Err(error)) => self.client_failed(Probe::Stats, &error),
            DashboardUpdate::Event(event) => {
                self.events.add(event);
                self.succeeded(Probe::Events);
            },
            DashboardUpdate::FilterChanged { filter, restarted } => {
                self.filter = filter;
                if restarted {
                    self.events.clear();
                    if self.connection(Probe::Events) != ConnectionStatus::Disabled {
                        self.connections.insert(Probe::Events, ConnectionStatus::Pending);
                    }
                }
            },
            DashboardUpdate::Authenticated => {
                self.auth_needed = false;
            },
        }
    }

    fn succeeded(&mut self, probe: Probe) {
        self.connections.insert(probe, ConnectionStatus::Connected);
        self.last_errors.remove(&probe);
    }

    fn client_failed(&mut self, probe: Probe, error: &ClientError) {
        if error.is_auth() {
            self.auth_needed = true;
        }
        self.failed(probe, error);
    }

    fn failed(&mut self, probe: Probe, error: &impl std::fmt::Display) {
        self.connections.insert(probe, ConnectionStatus::Failed);
        self.last_errors.insert(probe, error.to_string());
    }

    /// Summarize the state as of `now`.
    pub fn view(&self, now: DateTime<Utc>) -> DashboardView {
        let latest = self
            .catalog
            .keys()
            .into_iter()
            .chain([SERIES_THROUGHPUT, SERIES_ERRORS])
            .map(|key| (key.to_string(), self.series.latest_value(key)))
            .collect();

        let stats = self.last_stats.as_ref();
        let (workers_active, workers_stale) = stats
            .map(|s| s.worker_status_counts(s.fetched_at.unwrap_or(now), self.stats_interval))
            .unwrap_or_default();

        DashboardView {
            updated_at: now,
            window: self.window,
            latest,
            throughput: self.series.throughput(self.window, now),
            error_ratio: self.series.error_ratio(self.window, now),
            success_ratio: self.series.success_ratio(self.window, now),
            queue_trend: self.series.queue_trend(self.window, now),
            queue_depth: self.queue_depth(),
            tasks_running: self.tasks_running(),
            worker_count: self.worker_count(),
            workers_active,
            workers_stale,
            last_scrape_at: self.last_scrape_at,
            scrape_latency: self.last_snapshot.as_ref().map(|s| s.latency),
            health: self.last_health.clone(),
            stats: self.last_stats.clone(),
            events: self.events.items().into_iter().filter(|e| self.filter.matches(e)).collect(),
            event_filter: self.filter.to_string(),
            connections: self.connections.clone(),
            last_errors: self.last_errors.clone(),
            auth_needed: self.auth_needed,
        }
    }

    /// Scraped depth, else READY plus waiting tasks from the stats document.
    fn queue_depth(&self) -> f64 {
        let value = self.series.latest_value(MC_QUEUE_DEPTH);
        if !value.is_nan() {
            return value;
        }

        let Some(stats) = &self.last_stats else {
            return f64::NAN;
        };
        match (stats.task_count("READY"), stats.waiting_count()) {
            (None, None) => f64::NAN,
            (ready, waiting) => (ready.unwrap_or(0) + waiting.unwrap_or(0)) as f64,
        }
    }

    fn tasks_running(&self) -> f64 {
        let value = self.series.latest_value(MC_TASKS_RUNNING);
        if !value.is_nan() {
            return value;
        }
        self.last_stats
            .as_ref()
            .and_then(|s| s.task_count("RUNNING"))
            .map_or(f64::NAN, |running| running as f64)
    }

    fn worker_count(&self) -> f64 {
        let value = self.series.latest_value(MC_WORKER_COUNT);
        if !value.is_nan() {
            return value;
        }
        self.last_stats.as_ref().map_or(f64::NAN, |s| s.workers.len() as f64)
    }
}

/// Read-only summary published to dashboard consumers after each processed message. NaN marks a
/// value that is not available.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "window_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub window: Duration,
    pub latest: BTreeMap<String, f64>,
    pub throughput: f64,
    pub error_ratio: f64,
    pub success_ratio: f64,
    pub queue_trend: f64,
    pub queue_depth: f64,
    pub tasks_running: f64,
    pub worker_count: f64,
    pub workers_active: usize,
    pub workers_stale: usize,
    pub last_scrape_at: Option<DateTime<Utc>>,
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub scrape_latency: Option<Duration>,
    pub health: Option<HealthStatus>,
    pub stats: Option<FleetStats>,
    pub events: Vec<Event>,
    pub event_filter: String,
    pub connections: BTreeMap<Probe, ConnectionStatus>,
    pub last_errors: BTreeMap<Probe, String>,
    pub auth_needed: bool,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            window: Duration::ZERO,
            latest: BTreeMap::new(),
            throughput: f64::NAN,
            error_ratio: f64::NAN,
            success_ratio: f64::NAN,
            queue_trend: f64::NAN,
            queue_depth: f64::NAN,
            tasks_running: f64::NAN,
            worker_count: f64::NAN,
            workers_active: 0,
            workers_stale: 0,
            last_scrape_at: None,
            scrape_latency: None,
            health: None,
            stats: None,
            events: Vec::new(),
            event_filter: String::new(),
            connections: BTreeMap::new(),
            last_errors: BTreeMap::new(),
            auth_needed: false,
        }
    }
}
