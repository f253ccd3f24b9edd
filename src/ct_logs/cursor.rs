// Cursor Tracker
//
// Per-log progress: the remote index comes from the log's signed tree head,
// the local index is always re-derived from durable storage.

use super::client::LogApi;
use super::sources::LogSource;
use super::Result;
use crate::db::DedupStore;
use crate::error::SyncError;
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Local progress as stored for one log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalProgress {
    /// Every index up to and including this one is committed
    pub checkpoint: Option<u64>,
    /// Highest committed index (may sit above a hole)
    pub max_committed: Option<u64>,
}

impl LocalProgress {
    /// Entries between the checkpoint and the max that are still missing
    pub fn has_holes(&self) -> bool {
        self.checkpoint != self.max_committed
    }
}

pub struct CursorTracker {
    store: Arc<dyn DedupStore>,
    retry: RetryConfig,
}

impl CursorTracker {
    pub fn new(store: Arc<dyn DedupStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Query the published size and set `remote_index = size - 1`.
    ///
    /// Returns the new remote index, `None` for an empty log.
    pub async fn refresh_remote_index(
        &self,
        source: &mut LogSource,
        api: &dyn LogApi,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>> {
        let size = retry_with_backoff(
            &self.retry,
            cancel,
            |attempt, e| warn!("[{}] get-sth attempt {} failed: {}", source.name, attempt, e),
            || api.get_tree_size(cancel),
        )
        .await?;

        let remote = size.checked_sub(1);
        if let Some(previous) = source.remote_index {
            if remote.map_or(true, |r| r < previous) {
                return Err(SyncError::protocol(format!(
                    "Log {} shrank: tree size {} after remote index {}",
                    source.name, size, previous
                )));
            }
        }

        source.remote_index = remote;
        debug!("[{}] remote index {:?}", source.name, remote);
        Ok(remote)
    }

    /// Re-derive the local cursor from storage.
    ///
    /// The checkpoint advances to the highest committed index when every
    /// index between the old checkpoint and that max is present. The source's
    /// `local_index` is set to the checkpoint so a hole is re-fetched.
    pub async fn load_local_index(&self, source: &mut LogSource) -> Result<LocalProgress> {
        let mut progress = LocalProgress {
            checkpoint: self.store.checkpoint_for(&source.id).await?,
            max_committed: self.store.current_index_for(&source.id).await?,
        };

        if let Some(max) = progress.max_committed {
            let from = progress.checkpoint.map_or(0, |c| c + 1);
            if from <= max {
                let present = self.store.count_entries(&source.id, from, max).await?;
                if present == max - from + 1 {
                    self.store.set_checkpoint(&source.id, max).await?;
                    progress.checkpoint = Some(max);
                } else {
                    info!(
                        "[{}] {} entries missing between {} and {}; resuming from the gap",
                        source.name,
                        (max - from + 1) - present,
                        from,
                        max
                    );
                }
            }
        }

        match progress.checkpoint {
            Some(checkpoint) => {
                source.local_index = checkpoint;
                source.has_committed = true;
            }
            None => {
                source.local_index = 0;
                source.has_committed = false;
            }
        }

        Ok(progress)
    }

    /// Entries published but not yet committed
    pub fn missing_count(&self, source: &LogSource) -> u64 {
        source.missing_count()
    }

    /// Stored progress for display; does not touch the checkpoint
    pub async fn status(&self, source: &LogSource) -> Result<LogStatus> {
        Ok(LogStatus {
            name: source.name.clone(),
            log_id: source.id.to_hex(),
            url: source.url.clone(),
            checkpoint: self.store.checkpoint_for(&source.id).await?,
            max_committed: self.store.current_index_for(&source.id).await?,
            entries: self.store.entry_count(&source.id).await?,
        })
    }
}

/// Per-log progress as reported by the status command
#[derive(Debug, Clone, Serialize)]
pub struct LogStatus {
    pub name: String,
    pub log_id: String,
    pub url: String,
    pub checkpoint: Option<u64>,
    pub max_committed: Option<u64>,
    pub entries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ct_logs::canonicalizer::{CanonicalChain, ContentHash, LogEntryPointer};
    use crate::ct_logs::parser::{EntryType, RawLeafEntry};
    use crate::ct_logs::sources::LogId;
    use crate::db::{run_migrations, ChainRepositoryImpl, DatabaseConfig, DatabasePool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedSize(AtomicU64);

    #[async_trait]
    impl LogApi for FixedSize {
        async fn get_tree_size(&self, _cancel: &CancellationToken) -> Result<u64> {
            Ok(self.0.load(Ordering::SeqCst))
        }

        async fn get_entries(
            &self,
            _start: u64,
            _end: u64,
            _cancel: &CancellationToken,
        ) -> Result<Vec<RawLeafEntry>> {
            Ok(Vec::new())
        }

        async fn get_roots(&self, _cancel: &CancellationToken) -> Result<Vec<Result<Vec<u8>>>> {
            Ok(Vec::new())
        }
    }

    async fn tracker(dir: &tempfile::TempDir) -> (CursorTracker, Arc<ChainRepositoryImpl>) {
        let pool = DatabasePool::new(&DatabaseConfig::sqlite(dir.path().join("cursor.db")))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(ChainRepositoryImpl::new(pool));
        (
            CursorTracker::new(store.clone(), RetryConfig::no_retry()),
            store,
        )
    }

    async fn commit(store: &ChainRepositoryImpl, log_id: LogId, index: u64) {
        let parts = vec![index.to_be_bytes().to_vec()];
        let chain = CanonicalChain {
            hash: ContentHash::of_parts(&parts),
            entry_type: EntryType::X509Certificate,
            root_dn: None,
            unparseable: false,
            parts,
        };
        let upsert = store.upsert_chain(&log_id, &chain).await.unwrap();
        let pointer = LogEntryPointer {
            log_id,
            index,
            chain_hash: chain.hash,
        };
        store.upsert_entry_pointer(&pointer, upsert.chain_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_remote_index() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _) = tracker(&dir).await;
        let api = FixedSize(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let mut source = LogSource::new(LogId([1; 32]), "test", "https://ct.example");

        assert_eq!(
            tracker.refresh_remote_index(&mut source, &api, &cancel).await.unwrap(),
            None
        );

        api.0.store(3, Ordering::SeqCst);
        assert_eq!(
            tracker.refresh_remote_index(&mut source, &api, &cancel).await.unwrap(),
            Some(2)
        );
        assert_eq!(tracker.missing_count(&source), 3);

        api.0.store(1, Ordering::SeqCst);
        assert!(matches!(
            tracker.refresh_remote_index(&mut source, &api, &cancel).await,
            Err(SyncError::Protocol { .. })
        ));
        assert_eq!(source.remote_index, Some(2));
    }

    #[tokio::test]
    async fn test_empty_store_resumes_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, _) = tracker(&dir).await;
        let mut source = LogSource::new(LogId([1; 32]), "test", "https://ct.example");

        let progress = tracker.load_local_index(&mut source).await.unwrap();
        assert_eq!(progress, LocalProgress::default());
        assert_eq!(source.next_index(), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_stops_at_hole() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, store) = tracker(&dir).await;
        let log_id = LogId([1; 32]);
        let mut source = LogSource::new(log_id, "test", "https://ct.example");

        for index in [0, 1, 3] {
            commit(&store, log_id, index).await;
        }

        let progress = tracker.load_local_index(&mut source).await.unwrap();
        assert_eq!(progress.checkpoint, None);
        assert_eq!(progress.max_committed, Some(3));
        assert!(progress.has_holes());
        assert_eq!(source.next_index(), 0);

        commit(&store, log_id, 2).await;
        let progress = tracker.load_local_index(&mut source).await.unwrap();
        assert_eq!(progress.checkpoint, Some(3));
        assert!(!progress.has_holes());
        assert_eq!(source.local_index, 3);
        assert_eq!(source.next_index(), 4);
    }

    #[tokio::test]
    async fn test_checkpoint_advances_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let (tracker, store) = tracker(&dir).await;
        let log_id = LogId([2; 32]);
        let mut source = LogSource::new(log_id, "test", "https://ct.example");

        commit(&store, log_id, 0).await;
        tracker.load_local_index(&mut source).await.unwrap();
        assert_eq!(source.local_index, 0);
        assert!(source.has_committed);

        commit(&store, log_id, 1).await;
        commit(&store, log_id, 2).await;
        tracker.load_local_index(&mut source).await.unwrap();
        assert_eq!(source.local_index, 2);
        assert_eq!(store.checkpoint_for(&log_id).await.unwrap(), Some(2));
    }
}
