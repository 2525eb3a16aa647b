use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::path::Path;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

pub mod client;
pub mod contracts;
pub mod deployment;
pub mod runner;
pub mod runner_api;
pub mod sequencer;
pub mod store;
pub mod ui;
pub mod wallets;

pub mod test_helpers;

pub const LOG_FILE_PREFIX: &str = "bio-runner.log";

/// Logs go to a daily file under `log_dir`; the terminal belongs to the UI.
/// Keep the returned guard alive until exit so buffered lines get flushed.
pub fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("failed to install tracing subscriber: {e}"))?;
    Ok(guard)
}
