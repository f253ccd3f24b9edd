// Application Configuration
// TOML file listing the monitored logs plus storage and sync tunables

use crate::ct_logs::client::DEFAULT_REQUEST_TIMEOUT;
use crate::ct_logs::fetcher::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use crate::ct_logs::scheduler::{
    SyncSettings, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
};
use crate::ct_logs::sources::{LogId, LogSource};
use crate::db::DatabaseConfig;
use crate::error::SyncError;
use crate::utils::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logs: Vec<KnownLog>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blobs: Option<BlobConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One monitored log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownLog {
    pub description: String,
    /// Base64 DER public key; its SHA-256 is the log id
    pub key: String,
    pub url: String,
}

impl KnownLog {
    /// Validate and build the runtime source
    pub fn to_source(&self) -> crate::Result<LogSource> {
        let id = LogId::from_base64_key(&self.key).map_err(|e| {
            SyncError::config(format!("Log '{}': {}", self.description, e))
        })?;

        if self.url.trim().is_empty() {
            return Err(SyncError::config(format!(
                "Log '{}' has no URL",
                self.description
            )));
        }
        let url = url::Url::parse(self.url.trim()).map_err(|e| {
            SyncError::config(format!("Log '{}' has an invalid URL: {}", self.description, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::config(format!(
                "Log '{}' must use http or https, got {}",
                self.description,
                url.scheme()
            )));
        }

        Ok(LogSource::new(id, self.description.clone(), self.url.trim()))
    }
}

/// Sync pipeline tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            max_retries: retry.max_retries,
            initial_backoff_ms: retry.initial_backoff.as_millis() as u64,
            max_backoff_secs: retry.max_backoff.as_secs(),
        }
    }
}

impl SyncConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_secs(self.max_backoff_secs),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            batch_size: self.batch_size,
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            retry: self.retry(),
        }
    }
}

/// Blob arena location; per-certificate records are kept only when set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub path: PathBuf,
}

/// In-process metrics reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// External sink address. Only in-process reporting is built in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Seconds between statistics log lines; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: None,
            report_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config = Self::from_toml(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Check everything that would otherwise fail mid-run
    pub fn validate(&self) -> crate::Result<()> {
        if self.logs.is_empty() {
            return Err(SyncError::config("No logs configured"));
        }

        let mut seen = HashSet::new();
        for log in &self.logs {
            let source = log.to_source()?;
            if !seen.insert(source.id) {
                return Err(SyncError::config(format!(
                    "Log '{}' is listed more than once",
                    log.description
                )));
            }
        }

        if self.sync.workers == 0 {
            return Err(SyncError::config("sync.workers must be at least 1"));
        }
        if self.sync.batch_size == 0 || self.sync.batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::config(format!(
                "sync.batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        if self.sync.queue_capacity == 0 {
            return Err(SyncError::config("sync.queue_capacity must be at least 1"));
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(SyncError::config("sync.request_timeout_secs must be at least 1"));
        }

        self.database.connection_string()?;
        Ok(())
    }

    /// Runtime sources for every configured log
    pub fn sources(&self) -> crate::Result<Vec<LogSource>> {
        self.logs.iter().map(KnownLog::to_source).collect()
    }

    /// Create example configuration file
    pub fn create_example_config(path: impl AsRef<Path>) -> crate::Result<()> {
        let example = r#"# Logs to mirror. The key is the log's base64 DER public key.
[[logs]]
description = "Example CT log"
key = "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEfahLEimAoz2t01p3uMziiLOl/fHTDM0YDOhBRuiBARsV4UvxG2LdNgoIGLrtCzWE0J5APC2em4JlvR8EEEFMoA=="
url = "https://ct.example.com/2025h1/"

[database]
# Database type: "postgres" or "sqlite"
type = "sqlite"
path = "./ctmirror.db"

# PostgreSQL configuration (uncomment to use)
# type = "postgres"
# host = "localhost"
# port = 5432
# database = "ctmirror"
# username = "ctmirror"
# password = "secure_password"
# max_connections = 10

[sync]
batch_size = 1000
workers = 4
queue_capacity = 4096
poll_interval_secs = 60
request_timeout_secs = 30
max_retries = 5
initial_backoff_ms = 250
max_backoff_secs = 30

# Store every certificate once in an append-only arena (optional)
# [blobs]
# path = "./ctmirror.blobs"

[metrics]
report_interval_secs = 60
# address = "127.0.0.1:8125"
"#;

        std::fs::write(path.as_ref(), example)?;
        Ok(())
    }
}
