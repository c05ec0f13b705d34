mod buffer;
mod decode;
mod filter;
mod frame;
mod listener;

pub use buffer::EventBuffer;
pub use decode::parse_event;
pub use filter::EventFilter;
pub use frame::SseDecoder;
pub use listener::{
    default_jitter, listen, listen_with_options, Backoff, Connector, HttpConnector, JitterFn, ListenOptions, Sleeper,
    TokioSleeper, DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MIN,
};
use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};

pub static EVENT_STREAM_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "event_stream_reconnects",
        "Number of times the event stream listener reconnected",
    )
    .expect("failed creating event_stream_reconnects metric")
});

pub static EVENT_STREAM_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("event_stream_records", "Number of event stream records by decode outcome"),
        &["outcome"],
    )
    .expect("failed creating event_stream_records metric")
});

pub static EVENT_STREAM_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "event_stream_connected",
        "Whether the event stream is currently connected (1) or not (0)",
    )
    .expect("failed creating event_stream_connected metric")
});
