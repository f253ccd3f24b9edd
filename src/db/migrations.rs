// Database Migrations
// Embedded schema for both PostgreSQL and SQLite, applied in version order

use crate::db::connection::{with_pool, DatabasePool};
use crate::db::config::DatabaseType;
use tracing::info;

/// One schema step, with a statement list per backend
struct Migration {
    version: i64,
    description: &'static str,
    sqlite: &'static str,
    postgres: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create chains and log entries",
        sqlite: r#"
            CREATE TABLE IF NOT EXISTS chains (
                chain_id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash BLOB NOT NULL UNIQUE,
                entry_type TEXT NOT NULL,
                root_dn TEXT,
                unresolved BOOLEAN NOT NULL,
                unparseable BOOLEAN NOT NULL DEFAULT FALSE,
                first_seen TIMESTAMP NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chain_logs (
                chain_id INTEGER NOT NULL REFERENCES chains(chain_id),
                log_id BLOB NOT NULL,
                UNIQUE (chain_id, log_id)
            );
            CREATE TABLE IF NOT EXISTS log_entries (
                log_id BLOB NOT NULL,
                entry_num BIGINT NOT NULL,
                chain_id INTEGER NOT NULL REFERENCES chains(chain_id),
                UNIQUE (log_id, entry_num)
            );
            CREATE TABLE IF NOT EXISTS log_checkpoints (
                log_id BLOB PRIMARY KEY,
                verified_index BIGINT NOT NULL
            )
        "#,
        postgres: r#"
            CREATE TABLE IF NOT EXISTS chains (
                chain_id BIGSERIAL PRIMARY KEY,
                hash BYTEA NOT NULL UNIQUE,
                entry_type TEXT NOT NULL,
                root_dn TEXT,
                unresolved BOOLEAN NOT NULL,
                unparseable BOOLEAN NOT NULL DEFAULT FALSE,
                first_seen TIMESTAMPTZ NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chain_logs (
                chain_id BIGINT NOT NULL REFERENCES chains(chain_id),
                log_id BYTEA NOT NULL,
                UNIQUE (chain_id, log_id)
            );
            CREATE TABLE IF NOT EXISTS log_entries (
                log_id BYTEA NOT NULL,
                entry_num BIGINT NOT NULL,
                chain_id BIGINT NOT NULL REFERENCES chains(chain_id),
                UNIQUE (log_id, entry_num)
            );
            CREATE TABLE IF NOT EXISTS log_checkpoints (
                log_id BYTEA PRIMARY KEY,
                verified_index BIGINT NOT NULL
            )
        "#,
    },
    Migration {
        version: 2,
        description: "create certificate blob records",
        sqlite: r#"
            CREATE TABLE IF NOT EXISTS certificates (
                certificate_id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash BLOB NOT NULL UNIQUE,
                blob_offset BIGINT NOT NULL,
                blob_length BIGINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chain_certificates (
                chain_id INTEGER NOT NULL REFERENCES chains(chain_id),
                position INTEGER NOT NULL,
                certificate_id INTEGER NOT NULL REFERENCES certificates(certificate_id),
                UNIQUE (chain_id, position)
            )
        "#,
        postgres: r#"
            CREATE TABLE IF NOT EXISTS certificates (
                certificate_id BIGSERIAL PRIMARY KEY,
                hash BYTEA NOT NULL UNIQUE,
                blob_offset BIGINT NOT NULL,
                blob_length BIGINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chain_certificates (
                chain_id BIGINT NOT NULL REFERENCES chains(chain_id),
                position INTEGER NOT NULL,
                certificate_id BIGINT NOT NULL REFERENCES certificates(certificate_id),
                UNIQUE (chain_id, position)
            )
        "#,
    },
];

const VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version BIGINT PRIMARY KEY,
        description TEXT NOT NULL
    )
"#;

/// Latest schema version known to this build
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Run database migrations
pub async fn run_migrations(pool: &DatabasePool) -> crate::Result<()> {
    with_pool!(pool, p => {
        sqlx::query(VERSION_TABLE).execute(p).await?;
    });

    let current = schema_version(pool).await?;
    let record = pool.sql("INSERT INTO schema_migrations (version, description) VALUES (?, ?)");

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let script = match pool.db_type() {
            DatabaseType::Sqlite => migration.sqlite,
            DatabaseType::Postgres => migration.postgres,
        };

        with_pool!(pool, p => {
            let mut tx = p.begin().await?;
            for statement in script.split(';').filter(|s| !s.trim().is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query(&record)
                .bind(migration.version)
                .bind(migration.description)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        });

        info!(
            version = migration.version,
            "Applied migration: {}", migration.description
        );
    }

    Ok(())
}

/// Highest applied schema version (0 on a fresh database)
pub async fn schema_version(pool: &DatabasePool) -> crate::Result<i64> {
    let version: Option<i64> = with_pool!(pool, p => {
        sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(p)
            .await?
    });
    Ok(version.unwrap_or(0))
}
