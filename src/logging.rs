//! Logging setup for the battguard daemon.
//!
//! The monitor daemon logs human-readable output to stderr and JSON to a
//! daily-rotated file under its data directory. One-shot CLI commands use
//! only the stderr layer.

use std::path::Path;
use thiserror::Error;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Subdirectory of the data dir holding rotated log files.
const LOG_DIR: &str = "log";
/// Maximum number of rotated files to retain.
const MAX_LOG_FILES: usize = 3;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),
}

/// Guard that keeps the non-blocking writer alive.
/// Must be held for the lifetime of the daemon.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize logging for the monitor daemon: compact stderr plus a
/// daily-rotating JSON file under `<data_dir>/log`.
pub fn init_daemon(data_dir: &Path) -> Result<LogGuard, LoggingError> {
    let log_dir = data_dir.join(LOG_DIR);
    std::fs::create_dir_all(&log_dir).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: log_dir.display().to_string(),
        source: e,
    })?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix("battguard")
        .filename_suffix("log")
        .build(&log_dir)
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(non_blocking_file);

    let stderr_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Minimal stderr-only logging for one-shot commands.
pub fn init_cli() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}
