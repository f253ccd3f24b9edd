// CT Log API Client
//
// Handles HTTP communication with CT log servers. Every call is raced against
// a cancellation token and bounded by a per-request timeout; retries are the
// caller's concern (see utils::retry).

use super::parser::{self, RawLeafEntry};
use super::Result;
use crate::error::SyncError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only view of a remote CT log
#[async_trait]
pub trait LogApi: Send + Sync {
    /// Current published tree size (from the signed tree head)
    async fn get_tree_size(&self, cancel: &CancellationToken) -> Result<u64>;

    /// Entries in the inclusive range `[start, end]`. Servers may return
    /// fewer entries than requested.
    async fn get_entries(
        &self,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawLeafEntry>>;

    /// DER-encoded accepted root certificates. Entries that are not valid
    /// base64 are returned as `Err` so the caller can count and skip them.
    async fn get_roots(&self, cancel: &CancellationToken) -> Result<Vec<Result<Vec<u8>>>>;
}

/// CT Log API Client
pub struct CtClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CtClient {
    /// Create a client for the log at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .user_agent(concat!("ctmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/ct/v1/{}", self.base_url, path)
    }

    /// GET `url` and decode the JSON body, honouring cancellation
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let request = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SyncError::Http {
                    status: status.as_u16(),
                    details: format!("Request to {} failed with status: {}", url, status),
                });
            }
            response.json::<T>().await.map_err(|e| {
                SyncError::protocol(format!("Failed to parse response from {}: {}", url, e))
            })
        };

        with_deadline(self.timeout, cancel, request).await
    }
}

#[async_trait]
impl LogApi for CtClient {
    async fn get_tree_size(&self, cancel: &CancellationToken) -> Result<u64> {
        let url = self.endpoint("get-sth");
        let sth: SignedTreeHead = self.get_json(&url, cancel).await?;
        Ok(sth.tree_size)
    }

    async fn get_entries(
        &self,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawLeafEntry>> {
        let url = format!(
            "{}?start={}&end={}",
            self.endpoint("get-entries"),
            start,
            end
        );

        debug!("Fetching entries from {} to {}", start, end);

        let response: EntriesResponse = self.get_json(&url, cancel).await?;

        // get-entries items carry no index of their own: an item's position in
        // the reply is its index. The fetcher's index check only matters for
        // LogApi implementations that report indices themselves.
        Ok(response
            .entries
            .iter()
            .enumerate()
            .map(|(offset, entry)| parser::decode_entry(entry, start + offset as u64))
            .collect())
    }

    async fn get_roots(&self, cancel: &CancellationToken) -> Result<Vec<Result<Vec<u8>>>> {
        use base64::Engine;

        let url = self.endpoint("get-roots");
        let roots: RootsResponse = self.get_json(&url, cancel).await?;
        Ok(roots
            .certificates
            .iter()
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| SyncError::parse(format!("Invalid base64 root: {}", e)))
            })
            .collect())
    }
}

/// Run `fut` unless the token fires or the deadline passes first
pub async fn with_deadline<T, F>(timeout: Duration, cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        outcome = tokio::time::timeout(timeout, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout { duration: timeout }),
        },
    }
}

/// Signed Tree Head response
#[derive(Debug, Deserialize, Serialize)]
struct SignedTreeHead {
    tree_size: u64,
    timestamp: u64,
    sha256_root_hash: String,
    tree_head_signature: String,
}

/// Get-entries API response
#[derive(Debug, Deserialize, Serialize)]
struct EntriesResponse {
    entries: Vec<CtLogEntryResponse>,
}

/// Get-roots API response
#[derive(Debug, Deserialize, Serialize)]
struct RootsResponse {
    certificates: Vec<String>,
}

/// Individual CT log entry from API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CtLogEntryResponse {
    pub leaf_input: String,
    pub extra_data: String,
}
