// StatusCommand - Per-log progress as stored in the database
// Licensed under GPL-3.0

use super::Command;
use crate::ct_logs::{CursorTracker, LogStatus};
use crate::db::{DedupStore, MirrorDatabase};
use crate::utils::retry::RetryConfig;
use crate::Args;
use async_trait::async_trait;
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;

/// StatusCommand reads progress without contacting any log
pub struct StatusCommand {
    args: Args,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    chains: u64,
    logs: Vec<LogStatus>,
}

impl StatusCommand {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    fn print_terminal(report: &StatusReport) {
        println!("\n{}", "Mirror Status".cyan().bold());
        println!("{}", "=".repeat(80));

        for log in &report.logs {
            let checkpoint = log
                .checkpoint
                .map_or_else(|| "-".to_string(), |c| c.to_string());
            let max = log
                .max_committed
                .map_or_else(|| "-".to_string(), |m| m.to_string());

            let marker = if log.max_committed.is_none() {
                "○".dimmed()
            } else if log.checkpoint == log.max_committed {
                "✓".green()
            } else {
                "!".yellow()
            };

            println!("  {} {}", marker, log.name.bold());
            println!("      {}", log.url.dimmed());
            println!(
                "      checkpoint: {} | highest: {} | entries: {}",
                checkpoint, max, log.entries
            );
        }

        println!("{}", "=".repeat(80));
        println!("  Distinct chains: {}", report.chains);
    }
}

#[async_trait]
impl Command for StatusCommand {
    async fn execute(&self) -> anyhow::Result<()> {
        let config = self.args.load_config()?;
        let db = MirrorDatabase::new(&config.database, None).await?;
        let store: Arc<dyn DedupStore> = db.chains();
        let tracker = CursorTracker::new(Arc::clone(&store), RetryConfig::no_retry());

        let mut logs = Vec::with_capacity(config.logs.len());
        for source in config.sources()? {
            logs.push(tracker.status(&source).await?);
        }
        let report = StatusReport {
            chains: store.chain_count().await?,
            logs,
        };
        db.close().await;

        if self.args.sync.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            Self::print_terminal(&report);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StatusCommand"
    }
}
