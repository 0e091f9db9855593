//! Tracing init: `RUST_LOG`-driven console filter plus a
//! daily-rolling file appender under `PRAKTOR_LOG_DIR` (default `./logs`).
//! Library crates never install a subscriber — this binary is the only
//! place `tracing_subscriber::registry().init()` is called.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::log_format::TextWithSpanIds;

/// Returned guard must be held for the process lifetime — dropping it stops
/// the file appender's background flush thread.
pub fn init() -> Result<WorkerGuard> {
    let log_dir = std::env::var("PRAKTOR_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "praktor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .event_format(TextWithSpanIds::default())
        .with_writer(file_writer)
        .with_ansi(false);

    let console_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
