// CT Log Sources
//
// One LogSource per monitored log, built from configuration at startup.

use super::Result;
use crate::error::SyncError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable log identifier: SHA-256 of the log's DER-encoded public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId(pub [u8; 32]);

impl LogId {
    /// Derive the identifier from a DER public key
    pub fn from_public_key(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    /// Derive the identifier from a base64-encoded DER public key
    pub fn from_base64_key(key: &str) -> Result<Self> {
        let der = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| SyncError::config(format!("Invalid base64 log key: {}", e)))?;
        if der.is_empty() {
            return Err(SyncError::config("Log key is empty"));
        }
        Ok(Self::from_public_key(&der))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Rebuild from a stored byte column
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            SyncError::parse(format!("Log id must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogId({})", self.to_hex())
    }
}

/// A monitored CT log
///
/// `local_index` and `remote_index` are progress markers owned by the log's
/// scheduler task; they are re-derived from storage and the remote log every
/// round and never shared across workers.
#[derive(Debug, Clone)]
pub struct LogSource {
    /// Stable identifier derived from the public key
    pub id: LogId,
    /// Human-readable description
    pub name: String,
    /// Base URL for the log API
    pub url: String,
    /// Highest entry index durably committed (0 when nothing is)
    pub local_index: u64,
    /// Published tree size minus one, `None` until the first refresh
    pub remote_index: Option<u64>,
    /// Whether any entry has been committed yet
    pub has_committed: bool,
}

impl LogSource {
    pub fn new(id: LogId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into().trim_end_matches('/').to_string(),
            local_index: 0,
            remote_index: None,
            has_committed: false,
        }
    }

    /// First index not yet known to be committed
    pub fn next_index(&self) -> u64 {
        if self.has_committed {
            self.local_index + 1
        } else {
            0
        }
    }

    /// Entries published but not yet committed
    pub fn missing_count(&self) -> u64 {
        match self.remote_index {
            Some(remote) => (remote + 1).saturating_sub(self.next_index()),
            None => 0,
        }
    }

    /// Whether the log has published entries beyond the local cursor
    pub fn has_work(&self) -> bool {
        self.missing_count() > 0
    }
}
