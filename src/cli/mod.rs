// CLI module - Command line interface and argument parsing
// Licensed under GPL-3.0

use crate::config::AppConfig;
use clap::Parser;
use std::path::PathBuf;

mod database_args;
mod sync_args;

pub use database_args::DatabaseArgs;
pub use sync_args::SyncArgs;

/// ctmirror - Incremental Certificate Transparency log mirror
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(name = "ctmirror")]
pub struct Args {
    /// Configuration file (TOML format)
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        default_value = "ctmirror.toml"
    )]
    pub config: PathBuf,

    #[command(flatten)]
    pub sync: SyncArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("ctmirror.toml"),
            sync: SyncArgs::default(),
            database: DatabaseArgs::default(),
        }
    }
}

impl Args {
    /// Command-line values win over the config file
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(workers) = self.sync.workers {
            config.sync.workers = workers;
        }
        if let Some(batch_size) = self.sync.batch_size {
            config.sync.batch_size = batch_size;
        }
        if let Some(poll_interval) = self.sync.poll_interval {
            config.sync.poll_interval_secs = poll_interval;
        }
        if let Some(report_interval) = self.sync.report_interval {
            config.metrics.report_interval_secs = report_interval;
        }
    }

    /// Load the config file, apply overrides, then validate the result
    pub fn load_config(&self) -> crate::Result<AppConfig> {
        let contents = std::fs::read_to_string(&self.config).map_err(|e| {
            crate::SyncError::config(format!(
                "Failed to read config {}: {}",
                self.config.display(),
                e
            ))
        })?;

        let mut config = AppConfig::from_toml(&contents)?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }
}
