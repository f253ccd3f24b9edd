// Chain Repository Implementation
// Dedup store over sqlx: chains, observing logs, entry pointers, checkpoints
// and (optionally) per-certificate blob records

use crate::ct_logs::canonicalizer::{CanonicalChain, LogEntryPointer};
use crate::ct_logs::sources::LogId;
use crate::db::connection::{with_pool, DatabasePool};
use crate::db::models::{CertificateRecord, ChainRecord, ChainUpsert, NewChain};
use crate::db::traits::DedupStore;
use crate::error::{StorageErrorKind, SyncError};
use crate::storage::BlobStore;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

const CHAIN_COLUMNS: &str =
    "chains.chain_id, chains.hash, chains.entry_type, chains.root_dn, chains.unresolved, chains.unparseable, chains.first_seen";

pub struct ChainRepositoryImpl {
    pool: DatabasePool,
    blobs: Option<Arc<BlobStore>>,
}

impl ChainRepositoryImpl {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool, blobs: None }
    }

    /// Store every certificate of newly seen chains in the blob arena
    pub fn with_blobs(mut self, blobs: Arc<BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn blobs(&self) -> Option<&Arc<BlobStore>> {
        self.blobs.as_ref()
    }

    /// Find or create the certificate row for `bytes`, appending to the arena
    /// on first sight.
    async fn ensure_certificate(&self, blobs: &Arc<BlobStore>, bytes: &[u8]) -> crate::Result<i64> {
        let hash = Sha256::digest(bytes).to_vec();
        if let Some(id) = self.certificate_id(&hash).await? {
            return Ok(id);
        }

        // durable before the row that points at it is committed
        let blob = blobs.append_owned(bytes.to_vec()).await?;
        let insert = self
            .pool
            .sql("INSERT INTO certificates (hash, blob_offset, blob_length) VALUES (?, ?, ?)");

        let result: crate::Result<()> = with_pool!(&self.pool, p => {
            sqlx::query(&insert)
                .bind(hash.as_slice())
                .bind(blob.offset as i64)
                .bind(blob.length as i64)
                .execute(p)
                .await
                .map(|_| ())
                .map_err(SyncError::from)
        });

        match result {
            Ok(()) => {}
            // another worker stored the same bytes first; our append stays unreferenced
            Err(e) if e.is_already_exists() => {
                debug!(offset = blob.offset, "certificate already stored, reusing existing row");
            }
            Err(e) => return Err(e),
        }

        self.certificate_id(&hash).await?.ok_or_else(|| {
            SyncError::storage(
                StorageErrorKind::NotFound,
                "certificate row missing after insert",
            )
        })
    }

    async fn certificate_id(&self, hash: &[u8]) -> crate::Result<Option<i64>> {
        let query = self
            .pool
            .sql("SELECT certificate_id FROM certificates WHERE hash = ?");
        let id = with_pool!(&self.pool, p => {
            sqlx::query_scalar(&query)
                .bind(hash)
                .fetch_optional(p)
                .await?
        });
        Ok(id)
    }

    /// Certificates of a chain in position order
    pub async fn chain_certificates(&self, chain_id: i64) -> crate::Result<Vec<CertificateRecord>> {
        let query = self.pool.sql(
            r#"
            SELECT c.certificate_id, c.hash, c.blob_offset, c.blob_length
            FROM chain_certificates cc
            JOIN certificates c ON c.certificate_id = cc.certificate_id
            WHERE cc.chain_id = ?
            ORDER BY cc.position
            "#,
        );
        let records = with_pool!(&self.pool, p => {
            sqlx::query_as::<_, CertificateRecord>(&query)
                .bind(chain_id)
                .fetch_all(p)
                .await?
        });
        Ok(records)
    }

    /// Reassemble the ordered parts of a chain from the blob arena
    pub async fn read_chain(&self, chain_id: i64) -> crate::Result<Vec<Vec<u8>>> {
        let blobs = self
            .blobs
            .as_ref()
            .ok_or_else(|| SyncError::config("Blob arena is not configured"))?;

        let records = self.chain_certificates(chain_id).await?;
        if records.is_empty() {
            return Err(SyncError::storage(
                StorageErrorKind::NotFound,
                format!("No certificates stored for chain {}", chain_id),
            ));
        }

        blobs
            .get_many(records.iter().map(CertificateRecord::blob).collect())
            .await
    }

    /// Total distinct certificates
    pub async fn certificate_count(&self) -> crate::Result<u64> {
        let count: i64 = with_pool!(&self.pool, p => {
            sqlx::query_scalar("SELECT COUNT(*) FROM certificates")
                .fetch_one(p)
                .await?
        });
        from_db(count)
    }
}

#[async_trait]
impl DedupStore for ChainRepositoryImpl {
    async fn upsert_chain(
        &self,
        log_id: &LogId,
        chain: &CanonicalChain,
    ) -> crate::Result<ChainUpsert> {
        // certificate rows live outside the chain transaction so a lost
        // unique-key race does not abort it
        let mut certificate_ids = Vec::new();
        if let Some(blobs) = &self.blobs {
            for part in &chain.parts {
                certificate_ids.push(self.ensure_certificate(blobs, part).await?);
            }
        }

        let row = NewChain::from(chain);
        let insert_chain = self.pool.sql(
            r#"
            INSERT INTO chains (hash, entry_type, root_dn, unresolved, unparseable, first_seen)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (hash) DO NOTHING
            "#,
        );
        let select_chain = self.pool.sql("SELECT chain_id FROM chains WHERE hash = ?");
        let observe = self.pool.sql(
            "INSERT INTO chain_logs (chain_id, log_id) VALUES (?, ?) ON CONFLICT (chain_id, log_id) DO NOTHING",
        );
        let link = self.pool.sql(
            r#"
            INSERT INTO chain_certificates (chain_id, position, certificate_id)
            VALUES (?, ?, ?)
            ON CONFLICT (chain_id, position) DO NOTHING
            "#,
        );

        let upsert = with_pool!(&self.pool, p => {
            let mut tx = p.begin().await?;

            let inserted = sqlx::query(&insert_chain)
                .bind(row.hash.as_slice())
                .bind(row.entry_type)
                .bind(row.root_dn.as_deref())
                .bind(row.unresolved)
                .bind(row.unparseable)
                .bind(row.first_seen)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                == 1;

            let chain_id: i64 = sqlx::query_scalar(&select_chain)
                .bind(row.hash.as_slice())
                .fetch_one(&mut *tx)
                .await?;

            // set union on the observing logs, enforced by UNIQUE (chain_id, log_id)
            sqlx::query(&observe)
                .bind(chain_id)
                .bind(log_id.as_bytes())
                .execute(&mut *tx)
                .await?;

            if inserted {
                for (position, certificate_id) in certificate_ids.iter().enumerate() {
                    sqlx::query(&link)
                        .bind(chain_id)
                        .bind(position as i32)
                        .bind(*certificate_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }

            tx.commit().await?;
            ChainUpsert { chain_id, inserted }
        });

        Ok(upsert)
    }

    async fn upsert_entry_pointer(
        &self,
        pointer: &LogEntryPointer,
        chain_id: i64,
    ) -> crate::Result<bool> {
        let index = db_index(pointer.index)?;
        let query = self.pool.sql(
            r#"
            INSERT INTO log_entries (log_id, entry_num, chain_id)
            VALUES (?, ?, ?)
            ON CONFLICT (log_id, entry_num) DO NOTHING
            "#,
        );

        let affected = with_pool!(&self.pool, p => {
            sqlx::query(&query)
                .bind(pointer.log_id.as_bytes())
                .bind(index)
                .bind(chain_id)
                .execute(p)
                .await?
                .rows_affected()
        });
        Ok(affected == 1)
    }

    async fn current_index_for(&self, log_id: &LogId) -> crate::Result<Option<u64>> {
        let query = self
            .pool
            .sql("SELECT MAX(entry_num) FROM log_entries WHERE log_id = ?");
        let max: Option<i64> = with_pool!(&self.pool, p => {
            sqlx::query_scalar(&query)
                .bind(log_id.as_bytes())
                .fetch_one(p)
                .await?
        });
        max.map(from_db).transpose()
    }

    async fn count_entries(&self, log_id: &LogId, from: u64, to: u64) -> crate::Result<u64> {
        if from > to {
            return Ok(0);
        }
        let (from, to) = (db_index(from)?, db_index(to)?);
        let query = self.pool.sql(
            "SELECT COUNT(*) FROM log_entries WHERE log_id = ? AND entry_num >= ? AND entry_num <= ?",
        );
        let count: i64 = with_pool!(&self.pool, p => {
            sqlx::query_scalar(&query)
                .bind(log_id.as_bytes())
                .bind(from)
                .bind(to)
                .fetch_one(p)
                .await?
        });
        from_db(count)
    }

    async fn checkpoint_for(&self, log_id: &LogId) -> crate::Result<Option<u64>> {
        let query = self
            .pool
            .sql("SELECT verified_index FROM log_checkpoints WHERE log_id = ?");
        let verified: Option<i64> = with_pool!(&self.pool, p => {
            sqlx::query_scalar(&query)
                .bind(log_id.as_bytes())
                .fetch_optional(p)
                .await?
        });
        verified.map(from_db).transpose()
    }

    async fn set_checkpoint(&self, log_id: &LogId, index: u64) -> crate::Result<()> {
        let index = db_index(index)?;
        let query = self.pool.sql(
            r#"
            INSERT INTO log_checkpoints (log_id, verified_index)
            VALUES (?, ?)
            ON CONFLICT (log_id) DO UPDATE SET verified_index =
                CASE WHEN excluded.verified_index > log_checkpoints.verified_index
                     THEN excluded.verified_index
                     ELSE log_checkpoints.verified_index
                END
            "#,
        );
        with_pool!(&self.pool, p => {
            sqlx::query(&query)
                .bind(log_id.as_bytes())
                .bind(index)
                .execute(p)
                .await?;
        });
        Ok(())
    }

    async fn chain_by_hash(&self, hash: &[u8]) -> crate::Result<Option<ChainRecord>> {
        let query = format!("SELECT {} FROM chains WHERE hash = ?", CHAIN_COLUMNS);
        let query = self.pool.sql(&query);
        let record = with_pool!(&self.pool, p => {
            sqlx::query_as::<_, ChainRecord>(&query)
                .bind(hash)
                .fetch_optional(p)
                .await?
        });
        Ok(record)
    }

    async fn chain_for_entry(
        &self,
        log_id: &LogId,
        index: u64,
    ) -> crate::Result<Option<ChainRecord>> {
        let index = db_index(index)?;
        let query = format!(
            r#"
            SELECT {}
            FROM log_entries
            JOIN chains ON chains.chain_id = log_entries.chain_id
            WHERE log_entries.log_id = ? AND log_entries.entry_num = ?
            "#,
            CHAIN_COLUMNS
        );
        let query = self.pool.sql(&query);
        let record = with_pool!(&self.pool, p => {
            sqlx::query_as::<_, ChainRecord>(&query)
                .bind(log_id.as_bytes())
                .bind(index)
                .fetch_optional(p)
                .await?
        });
        Ok(record)
    }

    async fn observing_logs(&self, chain_id: i64) -> crate::Result<Vec<LogId>> {
        let query = self
            .pool
            .sql("SELECT log_id FROM chain_logs WHERE chain_id = ? ORDER BY log_id");
        let rows: Vec<Vec<u8>> = with_pool!(&self.pool, p => {
            sqlx::query_scalar(&query)
                .bind(chain_id)
                .fetch_all(p)
                .await?
        });
        rows.iter().map(|bytes| LogId::from_slice(bytes)).collect()
    }

    async fn chain_count(&self) -> crate::Result<u64> {
        let count: i64 = with_pool!(&self.pool, p => {
            sqlx::query_scalar("SELECT COUNT(*) FROM chains")
                .fetch_one(p)
                .await?
        });
        from_db(count)
    }

    async fn entry_count(&self, log_id: &LogId) -> crate::Result<u64> {
        let query = self
            .pool
            .sql("SELECT COUNT(*) FROM log_entries WHERE log_id = ?");
        let count: i64 = with_pool!(&self.pool, p => {
            sqlx::query_scalar(&query)
                .bind(log_id.as_bytes())
                .fetch_one(p)
                .await?
        });
        from_db(count)
    }
}

fn db_index(index: u64) -> crate::Result<i64> {
    i64::try_from(index).map_err(|_| {
        SyncError::storage(
            StorageErrorKind::Other,
            format!("Entry index {} exceeds storage range", index),
        )
    })
}

fn from_db(value: i64) -> crate::Result<u64> {
    u64::try_from(value).map_err(|_| {
        SyncError::storage(
            StorageErrorKind::Other,
            format!("Negative value {} read from storage", value),
        )
    })
}
