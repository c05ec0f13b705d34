use std::fs::OpenOptions;
use std::future::Future;
use std::sync::Mutex;

use clap::Parser;
use fleetwatch::client::FleetClient;
use fleetwatch::engine::{DashboardView, Engine};
use fleetwatch::settings::{CliOptions, Settings};
use fleetwatch::{logging, metrics, Result};
use once_cell::sync::Lazy;
use prometheus::Registry;
use tokio::sync::watch;

static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("fleetwatch".to_string()), None).expect("failed to create prometheus registry")
});

fn main() -> Result<()> {
    let options = CliOptions::parse();
    let settings = Settings::load(&options)?;

    let log_file = OpenOptions::new().create(true).append(true).open(&settings.log_file)?;
    let subscriber = logging::get_subscriber("fleetwatch", "info", Mutex::new(log_file));
    logging::init_subscriber(subscriber);

    let main_span = tracing::trace_span!("main");
    let _main_span_guard = main_span.enter();

    metrics::register_metrics(&METRICS_REGISTRY)?;
    let client = FleetClient::from_settings(&settings.endpoints)?;

    start_runtime(async move {
        let (engine, handle) = Engine::new(settings, client);
        let engine_handle = tokio::spawn(engine.run());
        let reporter = tokio::spawn(log_scrape_summaries(handle.subscribe()));

        tracing::info!("fleetwatch engine running; ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("interrupt received; shutting down");
        handle.shutdown();

        engine_handle.await?;
        reporter.abort();
        let final_metrics = metrics::render_metrics(&METRICS_REGISTRY)?;
        tracing::info!(%final_metrics, "fleetwatch stopped");
        Ok(())
    })
}

/// Log one summary line for each processed scrape.
async fn log_scrape_summaries(mut rx_view: watch::Receiver<DashboardView>) {
    let mut last_scrape_at = None;
    while rx_view.changed().await.is_ok() {
        let view = rx_view.borrow().clone();
        if view.last_scrape_at.is_none() || view.last_scrape_at == last_scrape_at {
            continue;
        }
        last_scrape_at = view.last_scrape_at;

        tracing::info!(
            queue_depth=%view.queue_depth,
            tasks_running=%view.tasks_running,
            workers=%view.worker_count,
            throughput=%view.throughput,
            error_ratio=%view.error_ratio,
            queue_trend=%view.queue_trend,
            scrape_latency=?view.scrape_latency,
            connections=?view.connections,
            last_errors=?view.last_errors,
            auth_needed=%view.auth_needed,
            nr_events=%view.events.len(),
            "fleet scrape processed"
        );
    }
}

#[tracing::instrument(level="trace", skip(future), fields(worker_threads=num_cpus::get()))]
fn start_runtime<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let worker_threads = num_cpus::get();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?
        .block_on(future)
}
