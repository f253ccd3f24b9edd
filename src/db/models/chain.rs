// Chain Record Models
// Dedup unit (chains), per-log observations and entry pointers

use crate::ct_logs::canonicalizer::CanonicalChain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persisted chain, unique by content hash
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChainRecord {
    pub chain_id: i64,
    pub hash: Vec<u8>,
    pub entry_type: String,
    pub root_dn: Option<String>,
    pub unresolved: bool,
    pub unparseable: bool,
    pub first_seen: DateTime<Utc>,
}

/// Column values for a new chain row
#[derive(Debug, Clone)]
pub struct NewChain {
    pub hash: Vec<u8>,
    pub entry_type: &'static str,
    pub root_dn: Option<String>,
    pub unresolved: bool,
    pub unparseable: bool,
    pub first_seen: DateTime<Utc>,
}

impl From<&CanonicalChain> for NewChain {
    fn from(chain: &CanonicalChain) -> Self {
        Self {
            hash: chain.hash.as_bytes().to_vec(),
            entry_type: chain.entry_type.as_str(),
            root_dn: chain.root_dn.clone(),
            unresolved: chain.is_unresolved(),
            unparseable: chain.unparseable,
            first_seen: Utc::now(),
        }
    }
}

/// `(log, index) -> chain` pointer row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LogEntryRecord {
    pub log_id: Vec<u8>,
    pub entry_num: i64,
    pub chain_id: i64,
}

/// Result of a chain upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainUpsert {
    /// Identity of the (new or existing) chain row
    pub chain_id: i64,
    /// True when this call created the row
    pub inserted: bool,
}
