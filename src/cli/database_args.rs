// Database and configuration file arguments
// Licensed under GPL-3.0

use clap::Args;
use std::path::PathBuf;

/// Database setup and example configuration
#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// Initialize database (create tables and run migrations) and exit
    #[arg(long = "db-init")]
    pub init: bool,

    /// Write an example configuration file and exit
    #[arg(long = "config-example", value_name = "FILE", id = "config_example")]
    pub config_example: Option<PathBuf>,
}
