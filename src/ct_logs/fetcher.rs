// Entry Fetcher
//
// Pages through a log's get-entries API in fixed windows and pushes entries
// into the round's bounded queue in strictly increasing index order.

use super::client::LogApi;
use super::parser::RawLeafEntry;
use super::stats::{metric, MetricsSink};
use crate::error::SyncError;
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Default get-entries window
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

/// Largest window we ever ask for
pub const MAX_BATCH_SIZE: u64 = 2000;

/// How a fetch pass ended
#[derive(Debug)]
pub struct FetchOutcome {
    /// Entries pushed into the queue
    pub fetched: u64,
    /// First index that was not pushed
    pub next_index: u64,
    /// Set when the pass stopped before reaching the requested end
    pub failure: Option<SyncError>,
}

impl FetchOutcome {
    pub fn gave_up(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct EntryFetcher {
    api: Arc<dyn LogApi>,
    batch_size: u64,
    retry: RetryConfig,
    metrics: Arc<dyn MetricsSink>,
    log_name: String,
}

impl EntryFetcher {
    pub fn new(
        api: Arc<dyn LogApi>,
        batch_size: u64,
        retry: RetryConfig,
        metrics: Arc<dyn MetricsSink>,
        log_name: impl Into<String>,
    ) -> Self {
        Self {
            api,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            retry,
            metrics,
            log_name: log_name.into(),
        }
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Fetch `[from, to]` into `tx`. Dropping `tx` on return closes the
    /// stream for the workers.
    pub async fn fetch(
        &self,
        from: u64,
        to: u64,
        tx: mpsc::Sender<RawLeafEntry>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let mut next = from;
        let mut fetched = 0;

        while next <= to {
            let end = next.saturating_add(self.batch_size - 1).min(to);
            debug!("[{}] fetching window {}-{}", self.log_name, next, end);

            let started = Instant::now();
            let page = retry_with_backoff(
                &self.retry,
                cancel,
                |attempt, e| {
                    self.metrics.increment(metric::FETCH_RETRIES);
                    warn!(
                        "[{}] window {}-{} attempt {} failed: {}",
                        self.log_name, next, end, attempt, e
                    );
                },
                || self.api.get_entries(next, end, cancel),
            )
            .await;
            self.metrics.timing(metric::FETCH_LATENCY, started.elapsed());

            let page = match page {
                Ok(page) => accept_page(next, end, page),
                Err(e) => {
                    if !matches!(e, SyncError::Cancelled) {
                        error!(
                            "[{}] giving up on window {}-{}: {}",
                            self.log_name, next, end, e
                        );
                    }
                    return FetchOutcome {
                        fetched,
                        next_index: next,
                        failure: Some(e),
                    };
                }
            };

            if page.is_empty() {
                return FetchOutcome {
                    fetched,
                    next_index: next,
                    failure: Some(SyncError::protocol(format!(
                        "Log returned no usable entries for window {}-{}",
                        next, end
                    ))),
                };
            }

            for entry in page {
                let index = entry.index;
                let sent = tokio::select! {
                    _ = cancel.cancelled() => Err(SyncError::Cancelled),
                    sent = tx.send(entry) => sent.map_err(|_| {
                        SyncError::Other("entry queue closed".to_string())
                    }),
                };
                if let Err(e) = sent {
                    return FetchOutcome {
                        fetched,
                        next_index: next,
                        failure: Some(e),
                    };
                }

                next = index + 1;
                fetched += 1;
                self.metrics.increment(metric::ENTRIES_DOWNLOADED);
            }
        }

        FetchOutcome {
            fetched,
            next_index: next,
            failure: None,
        }
    }
}

/// Keep the prefix of a page whose indices line up with the request.
///
/// Some servers return a spurious index 0 part-way through a page; that is
/// taken as the end of the page. Entries past `end` are dropped.
fn accept_page(start: u64, end: u64, page: Vec<RawLeafEntry>) -> Vec<RawLeafEntry> {
    let mut accepted = Vec::with_capacity(page.len());

    for (offset, entry) in page.into_iter().enumerate() {
        let expected = start + offset as u64;
        if expected > end {
            break;
        }
        if entry.index != expected {
            if entry.index != 0 {
                warn!(
                    "Unexpected entry index {} (expected {}), ending page early",
                    entry.index, expected
                );
            }
            break;
        }
        accepted.push(entry);
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct_logs::parser::EntryType;
    use crate::ct_logs::stats::{NoopSink, StatsTracker};
    use crate::ct_logs::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    fn raw(index: u64) -> RawLeafEntry {
        RawLeafEntry {
            index,
            timestamp_ms: 0,
            entry_type: EntryType::X509Certificate,
            payload: index.to_be_bytes().to_vec(),
            chain: Vec::new(),
            precertificate: None,
        }
    }

    /// Serves `size` entries, at most `page_limit` per call, optionally
    /// failing the first `failures` calls.
    struct PagedLog {
        size: u64,
        page_limit: u64,
        failures: Mutex<usize>,
        zero_at: Option<u64>,
        calls: Mutex<Vec<(u64, u64)>>,
    }

    impl PagedLog {
        fn new(size: u64, page_limit: u64) -> Self {
            Self {
                size,
                page_limit,
                failures: Mutex::new(0),
                zero_at: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LogApi for PagedLog {
        async fn get_tree_size(&self, _cancel: &CancellationToken) -> Result<u64> {
            Ok(self.size)
        }

        async fn get_entries(
            &self,
            start: u64,
            end: u64,
            _cancel: &CancellationToken,
        ) -> Result<Vec<RawLeafEntry>> {
            self.calls.lock().unwrap().push((start, end));
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(SyncError::Network {
                        url: "fake".to_string(),
                        details: "connection reset".to_string(),
                    });
                }
            }

            let last = end.min(start + self.page_limit - 1).min(self.size - 1);
            Ok((start..=last)
                .map(|i| if Some(i) == self.zero_at { raw(0) } else { raw(i) })
                .collect())
        }

        async fn get_roots(&self, _cancel: &CancellationToken) -> Result<Vec<Result<Vec<u8>>>> {
            Ok(Vec::new())
        }
    }

    fn fetcher(api: Arc<PagedLog>, batch: u64, retry: RetryConfig) -> EntryFetcher {
        EntryFetcher::new(api, batch, retry, Arc::new(NoopSink), "test")
    }

    async fn drain(mut rx: mpsc::Receiver<RawLeafEntry>) -> Vec<u64> {
        let mut seen = Vec::new();
        while let Some(entry) = rx.recv().await {
            seen.push(entry.index);
        }
        seen
    }

    #[tokio::test]
    async fn test_fetches_all_windows_in_order() {
        let api = Arc::new(PagedLog::new(25, 100));
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let f = fetcher(api.clone(), 10, RetryConfig::no_retry());

        let (outcome, seen) = tokio::join!(f.fetch(0, 24, tx, &cancel), drain(rx));
        assert!(!outcome.gave_up());
        assert_eq!(outcome.fetched, 25);
        assert_eq!(outcome.next_index, 25);
        assert_eq!(seen, (0..25).collect::<Vec<_>>());
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec![(0, 9), (10, 19), (20, 24)]
        );
    }

    #[tokio::test]
    async fn test_short_pages_are_continued() {
        let api = Arc::new(PagedLog::new(10, 3));
        let (tx, rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        let f = fetcher(api, 100, RetryConfig::no_retry());

        let (outcome, seen) = tokio::join!(f.fetch(4, 9, tx, &cancel), drain(rx));
        assert_eq!(outcome.fetched, 6);
        assert_eq!(seen, vec![4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_spurious_zero_index_ends_page() {
        let mut log = PagedLog::new(10, 100);
        log.zero_at = Some(6);
        let api = Arc::new(log);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let f = fetcher(api.clone(), 100, RetryConfig::no_retry());

        let (outcome, seen) = tokio::join!(f.fetch(3, 9, tx, &cancel), drain(rx));
        assert_eq!(seen, vec![3, 4, 5]);
        // the next window starts at 6 and hits the same defect immediately
        assert!(outcome.gave_up());
        assert_eq!(outcome.next_index, 6);
        assert_eq!(api.calls.lock().unwrap()[1], (6, 9));
    }

    #[test]
    fn test_first_requested_zero_is_accepted() {
        let page = accept_page(0, 2, vec![raw(0), raw(1), raw(2), raw(3)]);
        assert_eq!(page.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_then_succeed() {
        let log = PagedLog::new(5, 100);
        *log.failures.lock().unwrap() = 2;
        let api = Arc::new(log);
        let stats = StatsTracker::new();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let retry = RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let f = EntryFetcher::new(api, 10, retry, Arc::new(stats.clone()), "test");

        let (outcome, seen) = tokio::join!(f.fetch(0, 4, tx, &cancel), drain(rx));
        assert!(!outcome.gave_up());
        assert_eq!(seen.len(), 5);
        assert_eq!(stats.get_snapshot().counter(metric::FETCH_RETRIES), 2);
        assert_eq!(stats.get_snapshot().counter(metric::ENTRIES_DOWNLOADED), 5);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_gives_up() {
        let log = PagedLog::new(5, 100);
        *log.failures.lock().unwrap() = 10;
        let api = Arc::new(log);
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let retry = RetryConfig::new(2, Duration::from_millis(1), Duration::from_millis(2));
        let f = fetcher(api.clone(), 10, retry);

        let (outcome, seen) = tokio::join!(f.fetch(0, 4, tx, &cancel), drain(rx));
        assert!(seen.is_empty());
        assert!(matches!(outcome.failure, Some(SyncError::Network { .. })));
        assert_eq!(api.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_observes_cancellation() {
        let api = Arc::new(PagedLog::new(10, 100));
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let f = fetcher(api, 10, RetryConfig::no_retry());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = f.fetch(0, 9, tx, &cancel).await;
        assert!(matches!(outcome.failure, Some(SyncError::Cancelled)));
        assert_eq!(outcome.fetched, 1);
    }
}
