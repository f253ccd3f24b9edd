// Database Module
// Durable storage for chains, entry pointers and sync checkpoints

pub mod config;
pub mod connection;
pub mod migrations;
pub mod models;
pub mod repositories;
pub mod traits;

// Re-exports
pub use config::{DatabaseConfig, DatabaseType};
pub use connection::DatabasePool;
pub use migrations::{run_migrations, schema_version};
pub use models::*;
pub use repositories::ChainRepositoryImpl;
pub use traits::*;

use crate::storage::BlobStore;
use std::sync::Arc;

/// Main database struct
pub struct MirrorDatabase {
    pool: DatabasePool,
    chains: Arc<ChainRepositoryImpl>,
}

impl MirrorDatabase {
    /// Connect, bring the schema up to date and build the dedup store
    pub async fn new(config: &DatabaseConfig, blobs: Option<Arc<BlobStore>>) -> crate::Result<Self> {
        let pool = DatabasePool::new(config).await?;

        // Run migrations
        run_migrations(&pool).await?;

        let mut chains = ChainRepositoryImpl::new(pool.clone());
        if let Some(blobs) = blobs {
            chains = chains.with_blobs(blobs);
        }

        Ok(Self {
            pool,
            chains: Arc::new(chains),
        })
    }

    /// Get database pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Shared dedup store handle
    pub fn chains(&self) -> Arc<ChainRepositoryImpl> {
        Arc::clone(&self.chains)
    }

    /// Close database connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}
