// Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ctmirror::ct_logs::{
    EntryType, LogApi, LogId, LogSource, LogSync, MetricsSink, RawLeafEntry, SyncSettings,
};
use ctmirror::db::{DatabaseConfig, DedupStore, MirrorDatabase};
use ctmirror::storage::BlobStore;
use ctmirror::utils::retry::RetryConfig;
use ctmirror::Result;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub fn x509(index: u64, payload: &[u8]) -> RawLeafEntry {
    RawLeafEntry {
        index,
        timestamp_ms: 1_700_000_000_000 + index,
        entry_type: EntryType::X509Certificate,
        payload: payload.to_vec(),
        chain: Vec::new(),
        precertificate: None,
    }
}

pub fn precert(index: u64, payload: &[u8], chain: &[&[u8]]) -> RawLeafEntry {
    RawLeafEntry {
        index,
        timestamp_ms: 1_700_000_000_000 + index,
        entry_type: EntryType::PreCertificate,
        payload: payload.to_vec(),
        chain: chain.iter().map(|c| c.to_vec()).collect(),
        precertificate: Some(b"precert".to_vec()),
    }
}

/// In-memory log. Entries are templates; their index is rewritten to their
/// position when served.
pub struct FakeLog {
    entries: Mutex<Vec<RawLeafEntry>>,
    /// Serve index 0 at this position once, the way some servers misbehave
    spurious_zero_at: Mutex<Option<u64>>,
    pub calls: Mutex<Vec<(u64, u64)>>,
}

impl FakeLog {
    pub fn new(entries: Vec<RawLeafEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            spurious_zero_at: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_spurious_zero_at(self, position: u64) -> Self {
        *self.spurious_zero_at.lock().unwrap() = Some(position);
        self
    }

    pub fn publish(&self, entry: RawLeafEntry) {
        let mut entries = self.entries.lock().unwrap();
        let index = entries.len() as u64;
        entries.push(RawLeafEntry { index, ..entry });
    }
}

#[async_trait]
impl LogApi for FakeLog {
    async fn get_tree_size(&self, _cancel: &CancellationToken) -> Result<u64> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn get_entries(
        &self,
        start: u64,
        end: u64,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RawLeafEntry>> {
        self.calls.lock().unwrap().push((start, end));
        let entries = self.entries.lock().unwrap();
        let mut zero_at = self.spurious_zero_at.lock().unwrap();

        let mut page = Vec::new();
        for index in start..=end.min(entries.len() as u64 - 1) {
            let mut entry = entries[index as usize].clone();
            entry.index = index;
            if *zero_at == Some(index) {
                *zero_at = None;
                entry.index = 0;
            }
            page.push(entry);
        }
        Ok(page)
    }

    async fn get_roots(&self, _cancel: &CancellationToken) -> Result<Vec<Result<Vec<u8>>>> {
        Ok(Vec::new())
    }
}

pub async fn open_db(dir: &tempfile::TempDir, blobs: bool) -> MirrorDatabase {
    let config = DatabaseConfig::sqlite(dir.path().join("mirror.db"));
    let blobs = blobs.then(|| Arc::new(BlobStore::open(dir.path().join("mirror.blobs")).unwrap()));
    MirrorDatabase::new(&config, blobs).await.unwrap()
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        batch_size: 4,
        workers: 3,
        queue_capacity: 8,
        retry: RetryConfig::no_retry(),
        ..Default::default()
    }
}

pub fn log_sync(
    id: u8,
    api: Arc<FakeLog>,
    store: Arc<dyn DedupStore>,
    metrics: Arc<dyn MetricsSink>,
) -> LogSync {
    let source = LogSource::new(
        LogId([id; 32]),
        format!("log-{}", id),
        format!("https://ct{}.example", id),
    );
    LogSync::new(source, api, store, metrics, settings())
}
