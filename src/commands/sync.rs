// SyncCommand - Mirror every configured log
// Licensed under GPL-3.0

use super::Command;
use crate::config::AppConfig;
use crate::ct_logs::{CtClient, LogApi, LogSync, MetricsSink, StatsTracker, SyncDaemon};
use crate::db::{DedupStore, MirrorDatabase};
use crate::storage::BlobStore;
use crate::Args;
use async_trait::async_trait;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// SyncCommand runs the fetch/persist pipeline for every configured log,
/// either continuously or for a single round (`--once`)
pub struct SyncCommand {
    args: Args,
}

impl SyncCommand {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    fn build_daemon(
        config: &AppConfig,
        store: Arc<dyn DedupStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> anyhow::Result<SyncDaemon> {
        let settings = config.sync.settings();
        let mut logs = Vec::with_capacity(config.logs.len());

        for source in config.sources()? {
            let api: Arc<dyn LogApi> =
                Arc::new(CtClient::new(&source.url, config.sync.request_timeout())?);
            info!("Mirroring {} ({})", source.name, source.url);
            logs.push(LogSync::new(
                source,
                api,
                Arc::clone(&store),
                Arc::clone(&metrics),
                settings.clone(),
            ));
        }

        Ok(SyncDaemon::new(logs, settings.poll_interval))
    }
}

#[async_trait]
impl Command for SyncCommand {
    async fn execute(&self) -> anyhow::Result<()> {
        let config = self.args.load_config()?;

        let blobs = match &config.blobs {
            Some(blob_config) => Some(Arc::new(BlobStore::open(&blob_config.path)?)),
            None => None,
        };
        let db = MirrorDatabase::new(&config.database, blobs.clone()).await?;

        let stats = StatsTracker::new();
        let store: Arc<dyn DedupStore> = db.chains();
        let daemon = Self::build_daemon(&config, store, Arc::new(stats.clone()))?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested, finishing in-flight entries");
                shutdown.cancel();
            }
        });

        if let Some(address) = &config.metrics.address {
            warn!(
                "No external metrics transport is available; {} is ignored and statistics are logged instead",
                address
            );
        }

        let report_every = config.metrics.report_interval_secs;
        if report_every > 0 {
            tokio::spawn(
                stats
                    .clone()
                    .run_reporter(Duration::from_secs(report_every), cancel.clone()),
            );
        }

        let mut failures = 0;
        if self.args.sync.once {
            for (log, result) in daemon.run_once(&cancel).await {
                match result {
                    Ok(report) => {
                        let line = format!(
                            "{}: fetched {} | committed {} | failed {} | new chains {}",
                            log,
                            report.fetched,
                            report.committed,
                            report.failed,
                            report.chains_inserted
                        );
                        if let Some(reason) = report.fetch_failure {
                            failures += 1;
                            println!("  {} {} ({})", "!".yellow(), line, reason);
                        } else {
                            println!("  {} {}", "✓".green(), line);
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        println!("  {} {}: {}", "✗".red(), log, e);
                    }
                }
            }
        } else {
            daemon.run(cancel.clone()).await;
        }

        // stops the reporter
        cancel.cancel();
        stats.report();

        if let Some(blobs) = &blobs {
            blobs.sync()?;
        }
        db.close().await;

        if failures > 0 {
            anyhow::bail!("{} log(s) did not complete their round", failures);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SyncCommand"
    }
}
