//! Command-line arguments.

use crate::config::SyncConfig;
use crate::error::ConfigError;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hosts-sync")]
#[command(about = "Edit a hosts file while it is kept in sync with changes made on disk")]
pub struct SyncArgs {
    /// Hosts file to edit (defaults to the platform hosts file)
    #[arg(short, long, env = "HOSTS_SYNC_FILE")]
    pub file: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, env = "HOSTS_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debounce and read-retry delay in milliseconds
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Interval between persist passes in milliseconds
    #[arg(long)]
    pub persist_interval_ms: Option<u64>,
}

impl SyncArgs {
    /// Load the config file, if any, and apply command-line overrides.
    pub fn into_config(self) -> Result<SyncConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::default(),
        };

        if let Some(file) = self.file {
            config.hosts_path = Some(file);
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        if let Some(ms) = self.persist_interval_ms {
            config.persist_interval_ms = ms;
        }

        config.hosts_path()?;
        Ok(config)
    }
}
