// Certificate Record Model
// Individual certificate bytes, deduplicated by SHA256 and stored in the blob arena

use crate::storage::BlobRef;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Certificate record in database (deduplicated by SHA256 of its bytes)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CertificateRecord {
    pub certificate_id: i64,
    pub hash: Vec<u8>,
    pub blob_offset: i64,
    pub blob_length: i64,
}

impl CertificateRecord {
    /// Location of the bytes inside the arena
    pub fn blob(&self) -> BlobRef {
        BlobRef {
            offset: self.blob_offset as u64,
            length: self.blob_length as u64,
        }
    }
}

/// Chain junction table record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChainCertificateRecord {
    pub chain_id: i64,
    pub position: i32, // 0 = leaf/TBS payload, then chain order
    pub certificate_id: i64,
}
