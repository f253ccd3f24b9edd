// Database Configuration
// Handles PostgreSQL and SQLite database configuration

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default upper bound on concurrent PostgreSQL connections
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgres,
    Sqlite,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,

    // PostgreSQL settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Bound on concurrent outstanding storage operations (shared by all logs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    // SQLite settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Create PostgreSQL configuration
    pub fn postgres(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
    ) -> Self {
        Self {
            db_type: DatabaseType::Postgres,
            host: Some(host),
            port: Some(port),
            database: Some(database),
            username: Some(username),
            password: Some(password),
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
            path: None,
        }
    }

    /// Create SQLite configuration
    pub fn sqlite(path: PathBuf) -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            max_connections: None,
            path: Some(path),
        }
    }

    /// Effective connection bound. SQLite is single-writer.
    pub fn pool_size(&self) -> u32 {
        match self.db_type {
            DatabaseType::Postgres => self
                .max_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS)
                .max(1),
            DatabaseType::Sqlite => 1,
        }
    }

    /// Generate database URL for sqlx
    pub fn connection_string(&self) -> crate::Result<String> {
        match self.db_type {
            DatabaseType::Postgres => {
                let host = required(&self.host, "PostgreSQL host")?;
                let port = self
                    .port
                    .ok_or_else(|| SyncError::config("Missing PostgreSQL port"))?;
                let database = required(&self.database, "database name")?;
                let username = required(&self.username, "username")?;
                let password = required(&self.password, "password")?;

                Ok(format!(
                    "postgres://{}:{}@{}:{}/{}",
                    username, password, host, port, database
                ))
            }
            DatabaseType::Sqlite => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| SyncError::config("Missing SQLite path"))?;

                let path_str = path.to_string_lossy();
                if path_str == ":memory:" {
                    Ok(format!("sqlite:{}", path_str))
                } else if path_str.starts_with('/') {
                    // absolute UNIX path already supplies the third slash
                    Ok(format!("sqlite://{}", path.display()))
                } else if cfg!(windows) && path_str.len() > 1 && path_str.as_bytes()[1] == b':' {
                    Ok(format!("sqlite:///{}", path.display()))
                } else {
                    Ok(format!("sqlite:{}", path.display()))
                }
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> crate::Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SyncError::config(format!("Missing {}", what)))
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::sqlite(PathBuf::from("ctmirror.db"))
    }
}
