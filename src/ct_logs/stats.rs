// CT Sync Metrics
//
// Side-channel sink the pipeline reports into, plus an in-memory tracker that
// aggregates the same signals and logs them periodically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Metric names emitted by the pipeline
pub mod metric {
    pub const ENTRIES_DOWNLOADED: &str = "entries.downloaded";
    pub const ENTRIES_COMMITTED: &str = "entries.committed";
    pub const ENTRIES_FAILED: &str = "entries.failed";
    pub const ENTRIES_REMAINING: &str = "entries.remaining";
    pub const CHAINS_INSERTED: &str = "chains.inserted";
    pub const CHAINS_MERGED: &str = "chains.merged";
    pub const INSERT_LATENCY: &str = "insert.latency";
    pub const FETCH_LATENCY: &str = "fetch.latency";
    pub const FETCH_RETRIES: &str = "fetch.retries";
    pub const ROOTS_PARSE_FAILURES: &str = "roots.parse_failures";
    pub const ROUND_FAILED: &str = "round.failed";
}

/// Counter/timer/gauge sink. Implementations must be cheap and non-blocking.
pub trait MetricsSink: Send + Sync {
    fn increment_by(&self, name: &str, value: u64);

    fn timing(&self, name: &str, duration: Duration);

    fn gauge(&self, name: &str, value: u64);

    fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment_by(&self, _name: &str, _value: u64) {}
    fn timing(&self, _name: &str, _duration: Duration) {}
    fn gauge(&self, _name: &str, _value: u64) {}
}

/// Aggregated timer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl TimerStats {
    pub fn avg_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ms / self.count
        }
    }
}

/// Snapshot of everything recorded so far
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
    pub timers: BTreeMap<String, TimerStats>,
    /// Seconds since the tracker was created
    pub uptime_secs: u64,
}

impl Stats {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(name).copied()
    }
}

/// Thread-safe in-memory metrics tracker
#[derive(Clone)]
pub struct StatsTracker {
    stats: Arc<Mutex<Stats>>,
    started: Instant,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(Stats::default())),
            started: Instant::now(),
        }
    }

    /// Current statistics snapshot
    pub fn get_snapshot(&self) -> Stats {
        let mut snapshot = match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(_) => Stats::default(),
        };
        snapshot.uptime_secs = self.started.elapsed().as_secs();
        snapshot
    }

    /// Committed entries per second since start
    pub fn commit_rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_snapshot().counter(metric::ENTRIES_COMMITTED) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log a summary line through tracing
    pub fn report(&self) {
        let snapshot = self.get_snapshot();
        let insert = snapshot
            .timers
            .get(metric::INSERT_LATENCY)
            .copied()
            .unwrap_or_default();

        info!(
            downloaded = snapshot.counter(metric::ENTRIES_DOWNLOADED),
            committed = snapshot.counter(metric::ENTRIES_COMMITTED),
            failed = snapshot.counter(metric::ENTRIES_FAILED),
            chains_inserted = snapshot.counter(metric::CHAINS_INSERTED),
            chains_merged = snapshot.counter(metric::CHAINS_MERGED),
            retries = snapshot.counter(metric::FETCH_RETRIES),
            remaining = snapshot.gauge(metric::ENTRIES_REMAINING).unwrap_or(0),
            avg_insert_ms = insert.avg_ms(),
            rate = format!("{:.2}/s", self.commit_rate()),
            "Sync statistics"
        );
    }

    /// Report every `every` until cancelled
    pub async fn run_reporter(self, every: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(every);
        // first tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.report(),
            }
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for StatsTracker {
    fn increment_by(&self, name: &str, value: u64) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats.counters.entry(name.to_string()).or_insert(0) += value;
        }
    }

    fn timing(&self, name: &str, duration: Duration) {
        if let Ok(mut stats) = self.stats.lock() {
            let ms = duration.as_millis() as u64;
            let timer = stats.timers.entry(name.to_string()).or_default();
            timer.count += 1;
            timer.total_ms += ms;
            timer.max_ms = timer.max_ms.max(ms);
        }
    }

    fn gauge(&self, name: &str, value: u64) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.gauges.insert(name.to_string(), value);
        }
    }
}
