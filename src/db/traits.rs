// Database Traits
// Storage interface for the sync pipeline

use crate::ct_logs::canonicalizer::{CanonicalChain, LogEntryPointer};
use crate::ct_logs::sources::LogId;
use crate::db::models::{ChainRecord, ChainUpsert};
use async_trait::async_trait;

/// Idempotent, concurrency-safe persistence of chains and entry pointers.
///
/// Each call is independent: a failure affects only the record passed in.
/// Duplicate keys are resolved by the store and never surface as errors.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Insert the chain if its content hash is new, then add `log_id` to its
    /// observing-log set. Safe under concurrent callers from any log.
    async fn upsert_chain(&self, log_id: &LogId, chain: &CanonicalChain)
        -> crate::Result<ChainUpsert>;

    /// Insert-or-ignore the `(log, index)` pointer. Returns true when a new
    /// row was written.
    async fn upsert_entry_pointer(
        &self,
        pointer: &LogEntryPointer,
        chain_id: i64,
    ) -> crate::Result<bool>;

    /// Highest committed entry index for the log, `None` when nothing is
    async fn current_index_for(&self, log_id: &LogId) -> crate::Result<Option<u64>>;

    /// Number of committed pointers with index in `[from, to]`
    async fn count_entries(&self, log_id: &LogId, from: u64, to: u64) -> crate::Result<u64>;

    /// Highest index below which every entry is known to be committed
    async fn checkpoint_for(&self, log_id: &LogId) -> crate::Result<Option<u64>>;

    /// Advance the checkpoint; lower values than the stored one are ignored
    async fn set_checkpoint(&self, log_id: &LogId, index: u64) -> crate::Result<()>;

    /// Chain row by content hash
    async fn chain_by_hash(&self, hash: &[u8]) -> crate::Result<Option<ChainRecord>>;

    /// Chain referenced by the `(log, index)` pointer
    async fn chain_for_entry(&self, log_id: &LogId, index: u64)
        -> crate::Result<Option<ChainRecord>>;

    /// Every log that has observed the chain
    async fn observing_logs(&self, chain_id: i64) -> crate::Result<Vec<LogId>>;

    /// Total distinct chains
    async fn chain_count(&self) -> crate::Result<u64>;

    /// Total pointers for the log
    async fn entry_count(&self, log_id: &LogId) -> crate::Result<u64>;
}
