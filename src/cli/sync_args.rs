// Sync pipeline arguments
// Licensed under GPL-3.0

use clap::Args;

/// Sync mode and overrides for the `[sync]` section of the config file
#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// Run one round per log and exit
    #[arg(long = "once")]
    pub once: bool,

    /// Print per-log progress from the database and exit
    #[arg(long = "status", conflicts_with = "once")]
    pub status: bool,

    /// Print status as JSON
    #[arg(long = "json", requires = "status")]
    pub json: bool,

    /// Persistence workers per log
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Entries requested per get-entries call
    #[arg(short = 'b', long = "batch-size", value_name = "N")]
    pub batch_size: Option<u64>,

    /// Seconds to wait before polling a caught-up log again
    #[arg(long = "poll-interval", value_name = "SECONDS")]
    pub poll_interval: Option<u64>,

    /// Seconds between statistics lines (0 disables)
    #[arg(long = "report-interval", value_name = "SECONDS")]
    pub report_interval: Option<u64>,
}
