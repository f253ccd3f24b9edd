// Sync Scheduler
//
// Drives fetch -> canonicalize -> persist rounds for one log at a time, and
// runs one such task per configured log. Each round is a bounded pipeline:
// the fetcher blocks once the queue is full, so memory stays flat no matter
// how far behind a log is.

use super::canonicalizer::Canonicalizer;
use super::client::LogApi;
use super::cursor::{CursorTracker, LocalProgress};
use super::fetcher::{EntryFetcher, DEFAULT_BATCH_SIZE};
use super::parser::RawLeafEntry;
use super::roots::TrustRoots;
use super::sources::LogSource;
use super::stats::{metric, MetricsSink};
use super::Result;
use crate::db::{ChainUpsert, DedupStore};
use crate::error::SyncError;
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of persistence workers per log
pub const DEFAULT_WORKERS: usize = 4;

/// Default cap on queued entries per log
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Default pause between rounds once a log is caught up
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Tunables shared by every log's pipeline
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryConfig::default(),
        }
    }
}

/// Summary of one round for one log
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub log: String,
    /// First index requested this round
    pub start_index: u64,
    pub remote_index: Option<u64>,
    pub fetched: u64,
    pub committed: u64,
    pub failed: u64,
    /// Entries still queued when the round was cancelled
    pub cancelled: u64,
    pub chains_inserted: u64,
    pub chains_merged: u64,
    /// Cursor re-derived from storage after the round
    pub progress: LocalProgress,
    /// Why the fetch stage stopped early, if it did
    pub fetch_failure: Option<String>,
}

impl RoundReport {
    /// Nothing was published beyond the local cursor
    pub fn is_idle(&self) -> bool {
        self.fetched == 0 && self.fetch_failure.is_none()
    }
}

/// Per-worker counters, merged into the report at the end of a round
#[derive(Debug, Default)]
struct WorkerTally {
    committed: u64,
    failed: u64,
    cancelled: u64,
    inserted: u64,
    merged: u64,
}

/// Owned per-log state. Only the log's own task touches it.
pub struct LogSync {
    source: LogSource,
    api: Arc<dyn LogApi>,
    roots: Option<Arc<TrustRoots>>,
    store: Arc<dyn DedupStore>,
    cursor: CursorTracker,
    metrics: Arc<dyn MetricsSink>,
    settings: SyncSettings,
}

impl LogSync {
    pub fn new(
        source: LogSource,
        api: Arc<dyn LogApi>,
        store: Arc<dyn DedupStore>,
        metrics: Arc<dyn MetricsSink>,
        settings: SyncSettings,
    ) -> Self {
        let cursor = CursorTracker::new(Arc::clone(&store), settings.retry.clone());
        Self {
            source,
            api,
            roots: None,
            store,
            cursor,
            metrics,
            settings,
        }
    }

    /// Use a pre-built root set instead of fetching it
    pub fn with_roots(mut self, roots: TrustRoots) -> Self {
        self.roots = Some(Arc::new(roots));
        self
    }

    pub fn source(&self) -> &LogSource {
        &self.source
    }

    /// Fetch the accepted roots once; later calls reuse the same set.
    pub async fn ensure_roots(&mut self, cancel: &CancellationToken) -> Result<Arc<TrustRoots>> {
        if let Some(roots) = &self.roots {
            return Ok(Arc::clone(roots));
        }

        let roots = TrustRoots::populate(self.api.as_ref(), &self.settings.retry, cancel).await?;
        self.metrics
            .increment_by(metric::ROOTS_PARSE_FAILURES, roots.parse_failures());
        info!("[{}] {} accepted roots", self.source.name, roots.len());

        let roots = Arc::new(roots);
        self.roots = Some(Arc::clone(&roots));
        Ok(roots)
    }

    /// Run one round: refresh, fetch everything missing, persist, re-derive
    /// the cursor. Errors before the pipeline starts are returned as `Err`; a
    /// fetch stage that stops early is reported in `fetch_failure`.
    pub async fn run_round(&mut self, cancel: &CancellationToken) -> Result<RoundReport> {
        let roots = self.ensure_roots(cancel).await?;

        self.cursor
            .refresh_remote_index(&mut self.source, self.api.as_ref(), cancel)
            .await?;
        let progress = self.cursor.load_local_index(&mut self.source).await?;

        let mut report = RoundReport {
            log: self.source.name.clone(),
            start_index: self.source.next_index(),
            remote_index: self.source.remote_index,
            progress,
            ..Default::default()
        };

        let missing = self.cursor.missing_count(&self.source);
        self.metrics.gauge(metric::ENTRIES_REMAINING, missing);
        let remote = match self.source.remote_index {
            Some(remote) if missing > 0 => remote,
            _ => {
                debug!("[{}] caught up at {:?}", self.source.name, progress.checkpoint);
                return Ok(report);
            }
        };

        info!(
            "[{}] syncing {} entries ({}-{})",
            self.source.name, missing, report.start_index, remote
        );

        let capacity = (missing.min(self.settings.queue_capacity as u64) as usize).max(1);
        let (tx, rx) = mpsc::channel::<RawLeafEntry>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let canonicalizer = Canonicalizer::new(self.source.id, roots);
        let workers: Vec<JoinHandle<WorkerTally>> = (0..self.settings.workers.max(1))
            .map(|_| {
                tokio::spawn(persist_worker(
                    Arc::clone(&rx),
                    canonicalizer.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.metrics),
                    self.settings.retry.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        let fetcher = EntryFetcher::new(
            Arc::clone(&self.api),
            self.settings.batch_size,
            self.settings.retry.clone(),
            Arc::clone(&self.metrics),
            self.source.name.clone(),
        );
        // tx is moved in and dropped on return, which lets the workers drain and exit
        let outcome = fetcher.fetch(report.start_index, remote, tx, cancel).await;
        report.fetched = outcome.fetched;

        for worker in workers {
            match worker.await {
                Ok(tally) => {
                    report.committed += tally.committed;
                    report.failed += tally.failed;
                    report.cancelled += tally.cancelled;
                    report.chains_inserted += tally.inserted;
                    report.chains_merged += tally.merged;
                }
                Err(e) => error!("[{}] persistence worker failed: {}", self.source.name, e),
            }
        }

        if let Some(failure) = outcome.failure {
            if !matches!(failure, SyncError::Cancelled) {
                self.metrics.increment(metric::ROUND_FAILED);
            }
            report.fetch_failure = Some(failure.to_string());
        }

        report.progress = self.cursor.load_local_index(&mut self.source).await?;
        self.metrics
            .gauge(metric::ENTRIES_REMAINING, self.source.missing_count());

        info!(
            "[{}] round done: fetched {}, committed {}, failed {}, new chains {}, cursor {:?}",
            self.source.name,
            report.fetched,
            report.committed,
            report.failed,
            report.chains_inserted,
            report.progress.checkpoint
        );
        Ok(report)
    }
}

/// Drain the shared queue until the fetcher closes it
async fn persist_worker(
    rx: Arc<Mutex<mpsc::Receiver<RawLeafEntry>>>,
    canonicalizer: Canonicalizer,
    store: Arc<dyn DedupStore>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> WorkerTally {
    let mut tally = WorkerTally::default();

    loop {
        let entry = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(entry) = entry else {
            break;
        };

        let index = entry.index;
        let started = Instant::now();
        match persist_entry(&canonicalizer, store.as_ref(), entry, &retry, &cancel).await {
            Ok(upsert) => {
                metrics.timing(metric::INSERT_LATENCY, started.elapsed());
                metrics.increment(metric::ENTRIES_COMMITTED);
                tally.committed += 1;
                if upsert.inserted {
                    metrics.increment(metric::CHAINS_INSERTED);
                    tally.inserted += 1;
                } else {
                    metrics.increment(metric::CHAINS_MERGED);
                    tally.merged += 1;
                }
            }
            // shutdown: the entry is re-fetched next run, nothing failed
            Err(SyncError::Cancelled) => {
                debug!(
                    "[{}] entry {} dropped on shutdown",
                    canonicalizer.log_id(),
                    index
                );
                tally.cancelled += 1;
            }
            Err(e) => {
                // isolated to this record; the checkpoint stays below it
                warn!(
                    "[{}] failed to persist entry {}: {}",
                    canonicalizer.log_id(),
                    index,
                    e
                );
                metrics.increment(metric::ENTRIES_FAILED);
                tally.failed += 1;
            }
        }
    }

    tally
}

async fn persist_entry(
    canonicalizer: &Canonicalizer,
    store: &dyn DedupStore,
    entry: RawLeafEntry,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<ChainUpsert> {
    let (chain, pointer) = canonicalizer.canonicalize(entry);
    let log_id = canonicalizer.log_id();
    let (chain, pointer, log_id) = (&chain, &pointer, &log_id);

    retry_with_backoff(
        retry,
        cancel,
        |attempt, e| debug!("entry {} storage attempt {} failed: {}", pointer.index, attempt, e),
        || async move {
            let upsert = store.upsert_chain(log_id, chain).await?;
            store.upsert_entry_pointer(pointer, upsert.chain_id).await?;
            Ok::<_, SyncError>(upsert)
        },
    )
    .await
}

/// Runs every configured log concurrently
pub struct SyncDaemon {
    logs: Vec<LogSync>,
    poll_interval: Duration,
}

impl SyncDaemon {
    pub fn new(logs: Vec<LogSync>, poll_interval: Duration) -> Self {
        Self {
            logs,
            poll_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// One round per log, concurrently, then return
    pub async fn run_once(self, cancel: &CancellationToken) -> Vec<(String, Result<RoundReport>)> {
        let (names, handles): (Vec<String>, Vec<JoinHandle<Result<RoundReport>>>) = self
            .logs
            .into_iter()
            .map(|mut log| {
                let name = log.source.name.clone();
                let cancel = cancel.clone();
                (name, tokio::spawn(async move { log.run_round(&cancel).await }))
            })
            .unzip();

        let results = futures::future::join_all(handles).await;
        names
            .into_iter()
            .zip(results)
            .map(|(name, joined)| (name, joined.map_err(SyncError::from).and_then(|r| r)))
            .collect()
    }

    /// Run rounds for every log until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!("Starting sync for {} log(s)", self.logs.len());

        let poll_interval = self.poll_interval;
        let handles: Vec<JoinHandle<()>> = self
            .logs
            .into_iter()
            .map(|log| tokio::spawn(run_log(log, poll_interval, cancel.clone())))
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Sync task failed: {}", e);
            }
        }

        info!("Sync stopped");
    }
}

/// Round loop for one log. Failures are logged and retried next tick.
async fn run_log(mut log: LogSync, poll_interval: Duration, cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        let busy = match log.run_round(&cancel).await {
            Ok(report) => {
                if let Some(failure) = &report.fetch_failure {
                    if !cancel.is_cancelled() {
                        error!("[{}] round ended early: {}", report.log, failure);
                    }
                    false
                } else {
                    !report.is_idle()
                }
            }
            Err(SyncError::Cancelled) => break,
            Err(e) => {
                log.metrics.increment(metric::ROUND_FAILED);
                error!("[{}] round failed: {}", log.source.name, e);
                false
            }
        };

        // a productive round goes straight into the next one
        if busy {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!("[{}] stopped", log.source.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct_logs::canonicalizer::{CanonicalChain, LogEntryPointer};
    use crate::ct_logs::parser::EntryType;
    use crate::ct_logs::sources::LogId;
    use crate::ct_logs::stats::StatsTracker;
    use crate::db::{
        run_migrations, ChainRecord, ChainRepositoryImpl, DatabaseConfig, DatabasePool,
    };
    use crate::error::StorageErrorKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Store whose pointer write for one index fails the first time it is tried
    struct FailOnceAt {
        inner: Arc<ChainRepositoryImpl>,
        index: u64,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl DedupStore for FailOnceAt {
        async fn upsert_chain(&self, log_id: &LogId, chain: &CanonicalChain) -> Result<ChainUpsert> {
            self.inner.upsert_chain(log_id, chain).await
        }

        async fn upsert_entry_pointer(
            &self,
            pointer: &LogEntryPointer,
            chain_id: i64,
        ) -> Result<bool> {
            if pointer.index == self.index && !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(SyncError::storage(StorageErrorKind::Other, "disk full"));
            }
            self.inner.upsert_entry_pointer(pointer, chain_id).await
        }

        async fn current_index_for(&self, log_id: &LogId) -> Result<Option<u64>> {
            self.inner.current_index_for(log_id).await
        }

        async fn count_entries(&self, log_id: &LogId, from: u64, to: u64) -> Result<u64> {
            self.inner.count_entries(log_id, from, to).await
        }

        async fn checkpoint_for(&self, log_id: &LogId) -> Result<Option<u64>> {
            self.inner.checkpoint_for(log_id).await
        }

        async fn set_checkpoint(&self, log_id: &LogId, index: u64) -> Result<()> {
            self.inner.set_checkpoint(log_id, index).await
        }

        async fn chain_by_hash(&self, hash: &[u8]) -> Result<Option<ChainRecord>> {
            self.inner.chain_by_hash(hash).await
        }

        async fn chain_for_entry(&self, log_id: &LogId, index: u64) -> Result<Option<ChainRecord>> {
            self.inner.chain_for_entry(log_id, index).await
        }

        async fn observing_logs(&self, chain_id: i64) -> Result<Vec<LogId>> {
            self.inner.observing_logs(chain_id).await
        }

        async fn chain_count(&self) -> Result<u64> {
            self.inner.chain_count().await
        }

        async fn entry_count(&self, log_id: &LogId) -> Result<u64> {
            self.inner.entry_count(log_id).await
        }
    }

    struct GrowingLog {
        size: AtomicU64,
    }

    #[async_trait]
    impl LogApi for GrowingLog {
        async fn get_tree_size(&self, _cancel: &CancellationToken) -> Result<u64> {
            Ok(self.size.load(Ordering::SeqCst))
        }

        async fn get_entries(
            &self,
            start: u64,
            end: u64,
            _cancel: &CancellationToken,
        ) -> Result<Vec<RawLeafEntry>> {
            Ok((start..=end)
                .map(|index| RawLeafEntry {
                    index,
                    timestamp_ms: index,
                    entry_type: EntryType::X509Certificate,
                    // every third entry repeats the same bytes
                    payload: (index % 3).to_be_bytes().to_vec(),
                    chain: Vec::new(),
                    precertificate: None,
                })
                .collect())
        }

        async fn get_roots(&self, _cancel: &CancellationToken) -> Result<Vec<Result<Vec<u8>>>> {
            Ok(Vec::new())
        }
    }

    async fn store(dir: &tempfile::TempDir) -> Arc<ChainRepositoryImpl> {
        let pool = DatabasePool::new(&DatabaseConfig::sqlite(dir.path().join("sync.db")))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(ChainRepositoryImpl::new(pool))
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            batch_size: 4,
            workers: 3,
            queue_capacity: 2,
            poll_interval: Duration::from_millis(10),
            retry: RetryConfig::no_retry(),
        }
    }

    #[tokio::test]
    async fn test_rounds_advance_cursor_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let api = Arc::new(GrowingLog {
            size: AtomicU64::new(10),
        });
        let stats = StatsTracker::new();
        let log_id = LogId([7; 32]);
        let mut log = LogSync::new(
            LogSource::new(log_id, "growing", "https://ct.example"),
            api.clone(),
            store.clone(),
            Arc::new(stats.clone()),
            settings(),
        );
        let cancel = CancellationToken::new();

        let first = log.run_round(&cancel).await.unwrap();
        assert_eq!(first.fetched, 10);
        assert_eq!(first.committed, 10);
        assert_eq!(first.chains_inserted, 3);
        assert_eq!(first.chains_merged, 7);
        assert_eq!(first.progress.checkpoint, Some(9));
        assert_eq!(store.current_index_for(&log_id).await.unwrap(), Some(9));

        let idle = log.run_round(&cancel).await.unwrap();
        assert!(idle.is_idle());
        assert_eq!(idle.start_index, 10);

        api.size.store(15, Ordering::SeqCst);
        let second = log.run_round(&cancel).await.unwrap();
        assert_eq!(second.start_index, 10);
        assert_eq!(second.fetched, 5);
        assert_eq!(store.current_index_for(&log_id).await.unwrap(), Some(14));
        assert_eq!(store.chain_count().await.unwrap(), 3);

        let snapshot = stats.get_snapshot();
        assert_eq!(snapshot.counter(metric::ENTRIES_COMMITTED), 15);
        assert_eq!(snapshot.gauge(metric::ENTRIES_REMAINING), Some(0));
    }

    #[tokio::test]
    async fn test_daemon_run_once_covers_every_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let metrics: Arc<dyn MetricsSink> = Arc::new(StatsTracker::new());

        let logs = [LogId([1; 32]), LogId([2; 32])]
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                LogSync::new(
                    LogSource::new(id, format!("log-{}", i), "https://ct.example"),
                    Arc::new(GrowingLog {
                        size: AtomicU64::new(6),
                    }),
                    store.clone(),
                    Arc::clone(&metrics),
                    settings(),
                )
            })
            .collect();

        let results = SyncDaemon::new(logs, Duration::from_millis(10))
            .run_once(&CancellationToken::new())
            .await;
        assert_eq!(results.len(), 2);
        for (_, result) in &results {
            assert_eq!(result.as_ref().unwrap().committed, 6);
        }

        // both logs observed the same three chains
        assert_eq!(store.chain_count().await.unwrap(), 3);
        let shared = store
            .chain_for_entry(&LogId([1; 32]), 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.observing_logs(shared.chain_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_daemon_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let log = LogSync::new(
            LogSource::new(LogId([3; 32]), "idle", "https://ct.example"),
            Arc::new(GrowingLog {
                size: AtomicU64::new(0),
            }),
            store,
            Arc::new(StatsTracker::new()),
            settings(),
        );

        let cancel = CancellationToken::new();
        let daemon = SyncDaemon::new(vec![log], Duration::from_secs(3600));
        let handle = tokio::spawn(daemon.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_record_is_isolated_and_refilled() {
        let dir = tempfile::tempdir().unwrap();
        let inner = store(&dir).await;
        let store = Arc::new(FailOnceAt {
            inner: inner.clone(),
            index: 4,
            tripped: AtomicBool::new(false),
        });
        let stats = StatsTracker::new();
        let log_id = LogId([9; 32]);
        let mut log = LogSync::new(
            LogSource::new(log_id, "flaky", "https://ct.example"),
            Arc::new(GrowingLog {
                size: AtomicU64::new(10),
            }),
            store,
            Arc::new(stats.clone()),
            settings(),
        );
        let cancel = CancellationToken::new();

        let first = log.run_round(&cancel).await.unwrap();
        assert_eq!(first.fetched, 10);
        assert_eq!(first.failed, 1);
        assert_eq!(first.committed, 9);
        assert_eq!(inner.entry_count(&log_id).await.unwrap(), 9);
        assert!(inner.chain_for_entry(&log_id, 4).await.unwrap().is_none());
        for sibling in [3, 5, 9] {
            assert!(inner.chain_for_entry(&log_id, sibling).await.unwrap().is_some());
        }
        // the hole keeps the checkpoint below index 4
        assert!(first.progress.checkpoint.map_or(true, |c| c < 4));
        assert_eq!(first.progress.max_committed, Some(9));
        assert_eq!(stats.get_snapshot().counter(metric::ENTRIES_FAILED), 1);

        let second = log.run_round(&cancel).await.unwrap();
        assert!(second.start_index <= 4);
        assert_eq!(second.failed, 0);
        assert_eq!(second.progress.checkpoint, Some(9));
        assert_eq!(inner.entry_count(&log_id).await.unwrap(), 10);
        assert!(inner.chain_for_entry(&log_id, 4).await.unwrap().is_some());
        assert_eq!(inner.checkpoint_for(&log_id).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_entries_dropped_on_shutdown_are_not_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let stats = StatsTracker::new();
        let canonicalizer = Canonicalizer::new(LogId([4; 32]), Arc::new(TrustRoots::default()));

        let (tx, rx) = mpsc::channel(4);
        for index in 0..3 {
            tx.send(RawLeafEntry {
                index,
                timestamp_ms: 0,
                entry_type: EntryType::X509Certificate,
                payload: vec![index as u8],
                chain: Vec::new(),
                precertificate: None,
            })
            .await
            .unwrap();
        }
        drop(tx);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let tally = persist_worker(
            Arc::new(Mutex::new(rx)),
            canonicalizer,
            store.clone(),
            Arc::new(stats.clone()),
            RetryConfig::no_retry(),
            cancel,
        )
        .await;

        assert_eq!(tally.cancelled, 3);
        assert_eq!(tally.failed, 0);
        assert_eq!(tally.committed, 0);
        assert_eq!(stats.get_snapshot().counter(metric::ENTRIES_FAILED), 0);
        assert_eq!(store.entry_count(&LogId([4; 32])).await.unwrap(), 0);
    }
}
