use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::dashboard::{DashboardUpdate, Probe};
use super::EngineMsg;
use crate::client::FleetClient;
use crate::events::{self, EventFilter, ListenOptions};
use crate::health::fetch_health;
use crate::model::Event;
use crate::settings::EventSettings;
use crate::stats::fetch_stats;
use crate::telemetry::{scrape, MetricCatalog};

pub type EngineInbox = mpsc::UnboundedSender<EngineMsg>;

/// Run a one-shot probe and deliver its result to the inbox, unless cancelled first.
fn spawn_probe<F>(probe: Probe, tx: EngineInbox, cancel: CancellationToken, poll: F) -> JoinHandle<()>
where
    F: Future<Output = DashboardUpdate> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => tracing::debug!(%probe, "probe cancelled"),
            update = poll => {
                if tx.send(EngineMsg::Update(update)).is_err() {
                    tracing::debug!(%probe, "engine stopped before probe result was delivered");
                }
            },
        }
    })
}

pub fn spawn_scrape(
    client: FleetClient, url: Url, catalog: MetricCatalog, tx: EngineInbox, cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_probe(Probe::Metrics, tx, cancel, async move {
        DashboardUpdate::Scraped(scrape(&client, &url, &catalog).await)
    })
}

pub fn spawn_health(client: FleetClient, url: Url, tx: EngineInbox, cancel: CancellationToken) -> JoinHandle<()> {
    spawn_probe(Probe::Health, tx, cancel, async move {
        let (status, error) = fetch_health(&client, &url).await;
        DashboardUpdate::HealthChecked(status, error)
    })
}

pub fn spawn_stats(client: FleetClient, url: Url, tx: EngineInbox, cancel: CancellationToken) -> JoinHandle<()> {
    spawn_probe(Probe::Stats, tx, cancel, async move {
        DashboardUpdate::StatsFetched(fetch_stats(&client, &url).await)
    })
}

/// Deliver a tick for the probe after `interval`. Ticks carry the timer generation so a superseded
/// timer is ignored.
pub fn spawn_timer(
    probe: Probe, generation: u64, interval: Duration, tx: EngineInbox, cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {},
            _ = tokio::time::sleep(interval) => {
                let _ = tx.send(EngineMsg::Tick { probe, generation });
            },
        }
    })
}

/// A running event stream listener and the channel it feeds.
#[derive(Debug)]
pub struct EventSubscription {
    pub url: Url,
    pub rx_events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl EventSubscription {
    pub fn start(
        client: FleetClient, base_url: &Url, filter: &EventFilter, settings: &EventSettings, parent: &CancellationToken,
    ) -> Self {
        let url = filter.events_url(base_url);
        let (tx_events, rx_events) = mpsc::channel(settings.channel_capacity.max(1));
        let cancel = parent.child_token();
        let options = ListenOptions::from_settings(client, settings);

        tracing::info!(%url, %filter, "subscribing to fleet events");
        let handle = tokio::spawn(events::listen_with_options(url.clone(), tx_events, cancel.clone(), options));
        Self { url, rx_events, cancel, handle }
    }

    /// Cancel the listener; events already queued on the channel are dropped with it.
    pub fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.handle
    }
}
