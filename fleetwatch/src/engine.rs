mod dashboard;
mod tasks;

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::Utc;
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub use dashboard::{ConnectionStatus, DashboardState, DashboardUpdate, DashboardView, Probe};
use tasks::{EngineInbox, EventSubscription};

use crate::client::{ClientError, FleetClient, MetricLabel};
use crate::events::EventFilter;
use crate::model::Event;
use crate::settings::Settings;

const POLLED_PROBES: [Probe; 3] = [Probe::Metrics, Probe::Health, Probe::Stats];

pub static ENGINE_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("engine_messages", "Number of messages processed by the dashboard engine"),
        &["message"],
    )
    .expect("failed creating engine_messages metric")
});

/// Messages consumed, in order, by the engine task.
#[derive(Debug)]
pub enum EngineMsg {
    Update(DashboardUpdate),
    Tick { probe: Probe, generation: u64 },
    Refresh,
    SetEventFilter(String),
    Authenticated,
    Shutdown,
}

impl EngineMsg {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Update(DashboardUpdate::Scraped(_)) => "scraped",
            Self::Update(DashboardUpdate::HealthChecked(..)) => "health_checked",
            Self::Update(DashboardUpdate::StatsFetched(_)) => "stats_fetched",
            Self::Update(DashboardUpdate::Event(_)) => "event",
            Self::Update(_) => "update",
            Self::Tick { .. } => "tick",
            Self::Refresh => "refresh",
            Self::SetEventFilter(_) => "set_event_filter",
            Self::Authenticated => "authenticated",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dashboard engine is no longer running")]
    Stopped,

    #[error("{0}")]
    Client(#[from] ClientError),
}

impl MetricLabel for EngineError {
    fn label(&self) -> &'static str {
        match self {
            Self::Stopped => "engine::stopped",
            Self::Client(err) => err.label(),
        }
    }
}

impl From<mpsc::error::SendError<EngineMsg>> for EngineError {
    fn from(_: mpsc::error::SendError<EngineMsg>) -> Self {
        Self::Stopped
    }
}

/// Drives the probes and the event subscription, and is the only mutator of the dashboard state.
pub struct Engine {
    settings: Settings,
    client: FleetClient,
    state: DashboardState,
    tx_inbox: EngineInbox,
    rx_inbox: mpsc::UnboundedReceiver<EngineMsg>,
    tx_view: watch::Sender<DashboardView>,
    cancel: CancellationToken,
    in_flight: HashSet<Probe>,
    timers: HashMap<Probe, u64>,
    subscription: Option<EventSubscription>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("client", &self.client)
            .field("in_flight", &self.in_flight)
            .field("timers", &self.timers)
            .field("subscription", &self.subscription.as_ref().map(|s| s.url.as_str()))
            .finish()
    }
}

impl Engine {
    pub fn new(settings: Settings, client: FleetClient) -> (Self, EngineHandle) {
        Self::with_cancellation(settings, client, CancellationToken::new())
    }

    /// Cancelling `cancel` stops the engine and every task it started.
    pub fn with_cancellation(
        settings: Settings, client: FleetClient, cancel: CancellationToken,
    ) -> (Self, EngineHandle) {
        let state = DashboardState::new(&settings);
        let (tx_inbox, rx_inbox) = mpsc::unbounded_channel();
        let (tx_view, rx_view) = watch::channel(state.view(Utc::now()));

        let handle = EngineHandle {
            tx_inbox: tx_inbox.clone(),
            client: client.clone(),
            rx_view,
            cancel: cancel.clone(),
        };

        let engine = Self {
            settings,
            client,
            state,
            tx_inbox,
            rx_inbox,
            tx_view,
            cancel,
            in_flight: HashSet::new(),
            timers: HashMap::new(),
            subscription: None,
        };

        (engine, handle)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run(mut self) {
        tracing::info!(metrics_url=%self.settings.endpoints.metrics_url, "fleetwatch engine starting");
        self.refresh();
        self.subscribe_events();
        self.publish();

        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                msg = self.rx_inbox.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                event = next_event(&mut self.subscription) => EngineMsg::Update(DashboardUpdate::Event(event)),
            };

            ENGINE_MESSAGES.with_label_values(&[msg.label()]).inc();
            if !self.handle_message(msg) {
                break;
            }
        }

        self.cancel.cancel();
        if let Some(subscription) = self.subscription.take() {
            let _ = subscription.stop().await;
        }
        tracing::info!("fleetwatch engine stopped");
    }

    /// Returns `false` when the engine should stop.
    fn handle_message(&mut self, msg: EngineMsg) -> bool {
        match msg {
            EngineMsg::Update(update) => {
                if let Some(probe) = update.probe().filter(|p| POLLED_PROBES.contains(p)) {
                    self.in_flight.remove(&probe);
                    self.arm_timer(probe);
                }
                self.state.apply(update);
                self.publish();
            },

            EngineMsg::Tick { probe, generation } => {
                if self.timers.get(&probe) == Some(&generation) {
                    self.start_probe(probe);
                } else {
                    tracing::trace!(%probe, %generation, "ignoring superseded probe timer");
                }
            },

            EngineMsg::Refresh => self.refresh(),

            EngineMsg::SetEventFilter(raw) => {
                let filter = EventFilter::parse(&raw);
                if &filter != self.state.filter() {
                    let restarted = self.stream_url_changed(&filter);
                    tracing::info!(%filter, %restarted, "event filter changed");
                    self.state.apply(DashboardUpdate::FilterChanged { filter, restarted });
                    if restarted {
                        self.subscribe_events();
                    }
                    self.publish();
                }
            },

            EngineMsg::Authenticated => {
                self.state.apply(DashboardUpdate::Authenticated);
                self.refresh();
                self.subscribe_events();
                self.publish();
            },

            EngineMsg::Shutdown => {
                tracing::info!("fleetwatch engine shutdown requested");
                return false;
            },
        }

        true
    }

    /// Start every polled probe that is not already in flight.
    fn refresh(&mut self) {
        for probe in POLLED_PROBES {
            self.start_probe(probe);
        }
    }

    fn start_probe(&mut self, probe: Probe) {
        if self.in_flight.contains(&probe) {
            return;
        }

        let endpoints = &self.settings.endpoints;
        let tx = self.tx_inbox.clone();
        let cancel = self.cancel.clone();
        let client = self.client.clone();
        match probe {
            Probe::Metrics => {
                let catalog = self.state.catalog().clone();
                tasks::spawn_scrape(client, endpoints.metrics_url.clone(), catalog, tx, cancel);
            },
            Probe::Health => match &endpoints.health_url {
                Some(url) => {
                    tasks::spawn_health(client, url.clone(), tx, cancel);
                },
                None => return,
            },
            Probe::Stats => match &endpoints.stats_url {
                Some(url) => {
                    tasks::spawn_stats(client, url.clone(), tx, cancel);
                },
                None => return,
            },
            Probe::Events => return,
        }

        self.in_flight.insert(probe);
    }

    /// Re-arm the probe's timer; any earlier timer for the probe is superseded.
    fn arm_timer(&mut self, probe: Probe) {
        let telemetry = &self.settings.telemetry;
        let interval = match probe {
            Probe::Metrics => telemetry.poll_interval,
            Probe::Health => telemetry.health_interval,
            Probe::Stats => telemetry.stats_interval,
            Probe::Events => return,
        };

        let generation = self.timers.entry(probe).or_insert(0);
        *generation += 1;
        tasks::spawn_timer(probe, *generation, interval, self.tx_inbox.clone(), self.cancel.clone());
    }

    /// Whether `filter` selects a different server-side stream than the current subscription.
    fn stream_url_changed(&self, filter: &EventFilter) -> bool {
        let Some(base_url) = self.settings.endpoints.events_url.as_ref() else {
            return false;
        };
        self.subscription.as_ref().map_or(true, |s| s.url != filter.events_url(base_url))
    }

    /// Replace the event subscription with one for the current filter.
    fn subscribe_events(&mut self) {
        let Some(base_url) = self.settings.endpoints.events_url.as_ref() else {
            return;
        };

        if let Some(previous) = self.subscription.take() {
            tracing::debug!(url=%previous.url, "cancelling previous event subscription");
            drop(previous.stop());
        }

        self.subscription = Some(EventSubscription::start(
            self.client.clone(),
            base_url,
            self.state.filter(),
            &self.settings.events,
            &self.cancel,
        ));
    }

    fn publish(&self) {
        self.tx_view.send_replace(self.state.view(Utc::now()));
    }
}

/// Next event of the current subscription; never resolves when there is none.
async fn next_event(subscription: &mut Option<EventSubscription>) -> Event {
    if let Some(subscription) = subscription {
        if let Some(event) = subscription.rx_events.recv().await {
            return event;
        }
    }
    futures_util::future::pending().await
}

/// Control surface for a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx_inbox: EngineInbox,
    client: FleetClient,
    rx_view: watch::Receiver<DashboardView>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// The most recently published view.
    pub fn view(&self) -> DashboardView {
        self.rx_view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.rx_view.clone()
    }

    pub fn refresh(&self) -> Result<(), EngineError> {
        self.send(EngineMsg::Refresh)
    }

    /// Apply a filter expression such as `queue:emails timeout`; the event stream restarts with a
    /// cleared buffer when the filter changes.
    pub fn set_event_filter(&self, filter: impl Into<String>) -> Result<(), EngineError> {
        self.send(EngineMsg::SetEventFilter(filter.into()))
    }

    /// Install the token on the shared client, then re-poll and reconnect with it.
    pub fn set_bearer_token(&self, token: &str) -> Result<(), EngineError> {
        self.client.set_bearer_token(token)?;
        self.send(EngineMsg::Authenticated)
    }

    pub fn shutdown(&self) {
        if self.send(EngineMsg::Shutdown).is_err() {
            tracing::debug!("engine already stopped");
        }
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn send(&self, msg: EngineMsg) -> Result<(), EngineError> {
        self.tx_inbox.send(msg)?;
        Ok(())
    }
}
