//! Tracing Utilities Module
//!
//! Logging configuration for the netcmd binaries: console output plus an optional
//! append-only log file. The destination is always passed in by the caller so a
//! server can be constructed in tests without touching the filesystem.

use crate::config::LoggingConfig;
use crate::utils::error::{NetcmdError, Result};
use std::fs::OpenOptions;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter: `RUST_LOG` wins, then the configured level
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initializes the tracing subscriber with console and optional file output
///
/// # Arguments
/// * `config` - Log level and optional log file path
///
/// # Returns
/// * `Result<Option<WorkerGuard>>` - Guard of the non-blocking file writer; keep it alive
///   for as long as the program runs or buffered lines are lost
pub fn setup_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|e| {
                    NetcmdError::Config(format!("cannot open log file {}: {}", path.display(), e))
                })?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(build_filter(&config.level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_filter(build_filter(&config.level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| NetcmdError::Config(format!("cannot install tracing subscriber: {}", e)))?;

    Ok(guard)
}

/// Console-only logging for the client binaries, quiet unless asked
pub fn setup_client_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
