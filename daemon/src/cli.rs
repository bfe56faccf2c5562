use std::path::PathBuf;

use clap::{Parser, ValueEnum};

pub const DEFAULT_CONFIG_FILE: &str = "offerflow.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Watches a mailbox and turns supplier offers into spreadsheet rows.
#[derive(Debug, Parser)]
#[command(name = "offerflow", version, about)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "OFFERFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Clear all working directories and mark recent mail unseen before starting.
    #[arg(long)]
    pub reset: bool,

    /// Console log format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Directory for combined.log and error.log. Defaults to the configured log directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    /// Explicit path first, then `./offerflow.json`, then the user config directory.
    pub fn config_path(&self) -> PathBuf {
        if let Some(path) = &self.config {
            return path.clone();
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return local;
        }

        dirs::config_dir()
            .map(|dir| dir.join("offerflow").join(DEFAULT_CONFIG_FILE))
            .filter(|path| path.exists())
            .unwrap_or(local)
    }
}
