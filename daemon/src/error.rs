use std::path::PathBuf;

use thiserror::Error;

/// Startup failures that happen before tracing is available.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to create log directory {path}: {source}")]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
