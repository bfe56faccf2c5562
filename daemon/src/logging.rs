//! Console plus JSON file logging.
//!
//! `combined.log` receives every event that passes the filter, `error.log` only errors.
//! Records emitted through the `log` facade are forwarded into tracing.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::cli::LogFormat;
use crate::error::DaemonError;

pub const COMBINED_LOG: &str = "combined.log";
pub const ERROR_LOG: &str = "error.log";

/// Keeps the file writers flushing. Drop only at exit.
pub struct LogGuards {
    _combined: WorkerGuard,
    _errors: WorkerGuard,
}

pub fn init(format: LogFormat, log_dir: &Path) -> Result<LogGuards, DaemonError> {
    std::fs::create_dir_all(log_dir).map_err(|source| DaemonError::LogDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console = match format {
        LogFormat::Pretty => fmt::layer().with_target(false).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let (combined_writer, combined_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, COMBINED_LOG));
    let combined = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(combined_writer);

    let (error_writer, error_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, ERROR_LOG));
    let errors = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(error_writer)
        .with_filter(LevelFilter::ERROR);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(combined)
        .with(errors);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| DaemonError::Logging(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| DaemonError::Logging(e.to_string()))?;

    Ok(LogGuards {
        _combined: combined_guard,
        _errors: error_guard,
    })
}
