// ConfigExampleCommand - Write an example configuration file
// Licensed under GPL-3.0

use super::Command;
use crate::config::AppConfig;
use async_trait::async_trait;
use std::path::PathBuf;

pub struct ConfigExampleCommand {
    path: PathBuf,
}

impl ConfigExampleCommand {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Command for ConfigExampleCommand {
    async fn execute(&self) -> anyhow::Result<()> {
        AppConfig::create_example_config(&self.path)?;
        println!("✓ Example configuration saved to: {}", self.path.display());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ConfigExampleCommand"
    }
}
