use prometheus::{Encoder, Registry, TextEncoder};

use crate::Result;
use crate::{client, engine, events, telemetry};

#[tracing::instrument(level = "trace")]
pub fn register_metrics(registry: &Registry) -> Result<()> {
    registry.register(Box::new(client::FLEET_ERRORS.clone()))?;
    registry.register(Box::new(client::FLEET_PROBE_TIME.clone()))?;

    registry.register(Box::new(telemetry::FLEET_SCRAPE_TIME.clone()))?;

    registry.register(Box::new(events::EVENT_STREAM_RECONNECTS.clone()))?;
    registry.register(Box::new(events::EVENT_STREAM_RECORDS.clone()))?;
    registry.register(Box::new(events::EVENT_STREAM_CONNECTED.clone()))?;

    registry.register(Box::new(engine::ENGINE_MESSAGES.clone()))?;
    Ok(())
}

/// Text exposition of everything gathered from the registry.
pub fn render_metrics(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
