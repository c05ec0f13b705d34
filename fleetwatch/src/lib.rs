#![forbid(unsafe_code)]
#![warn(
    clippy::cargo,
    clippy::suspicious,
    // missing_docs,
    clippy::nursery,
    rust_2018_idioms
)]

pub mod client;
pub mod engine;
pub mod events;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod settings;
pub mod stats;
pub mod telemetry;

pub type Result<T> = anyhow::Result<T>;
