// Database Connection Pool
// Manages PostgreSQL and SQLite connection pools with sqlx

use crate::db::config::{DatabaseConfig, DatabaseType};
use crate::error::SyncError;
use sqlx::{Pool, Postgres, Sqlite};
use std::borrow::Cow;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How long a caller waits for a pooled connection before the store is
/// reported unavailable
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Database pool enum supporting both PostgreSQL and SQLite
#[derive(Clone, Debug)]
pub enum DatabasePool {
    Postgres(Pool<Postgres>),
    Sqlite(Pool<Sqlite>),
}

impl DatabasePool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> crate::Result<Self> {
        let connection_string = config.connection_string()?;
        let max_connections = config.pool_size();

        let pool = match config.db_type {
            DatabaseType::Postgres => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(&connection_string)
                    .await?;

                DatabasePool::Postgres(pool)
            }
            DatabaseType::Sqlite => {
                let connect_options =
                    sqlx::sqlite::SqliteConnectOptions::from_str(&connection_string)
                        .map_err(|e| {
                            SyncError::config(format!(
                                "Failed to parse SQLite connection string: {}",
                                e
                            ))
                        })?
                        .create_if_missing(true);

                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect_with(connect_options)
                    .await?;

                DatabasePool::Sqlite(pool)
            }
        };

        debug!(db_type = ?config.db_type, max_connections, "database pool ready");
        Ok(pool)
    }

    /// Get database type
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DatabasePool::Postgres(_) => DatabaseType::Postgres,
            DatabasePool::Sqlite(_) => DatabaseType::Sqlite,
        }
    }

    /// Close the connection pool
    pub async fn close(&self) {
        match self {
            DatabasePool::Postgres(pool) => pool.close().await,
            DatabasePool::Sqlite(pool) => pool.close().await,
        }
    }

    /// Adapt a query written with `?` placeholders to this pool's dialect.
    /// PostgreSQL uses $1, $2, $3... while SQLite uses ?, ?, ?...
    pub fn sql<'a>(&self, query: &'a str) -> Cow<'a, str> {
        match self.db_type() {
            DatabaseType::Sqlite => Cow::Borrowed(query),
            DatabaseType::Postgres => Cow::Owned(numbered_placeholders(query)),
        }
    }
}

fn numbered_placeholders(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 8);
    let mut n = 0;
    for c in query.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

/// Run the same sqlx code against whichever backend the pool wraps
macro_rules! with_pool {
    ($pool:expr, $p:ident => $body:expr) => {
        match $pool {
            $crate::db::connection::DatabasePool::Postgres($p) => $body,
            $crate::db::connection::DatabasePool::Sqlite($p) => $body,
        }
    };
}

pub(crate) use with_pool;
