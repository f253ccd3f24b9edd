// Error types for ctmirror
//
// This module provides the structured error taxonomy used across the sync
// pipeline. Every variant is classified by kind so callers (retry loops,
// the scheduler, the dedup store) can branch on it without inspecting
// message text.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Classification of a durable-storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// A unique constraint rejected the write; the record is already present
    AlreadyExists,
    /// The requested record does not exist
    NotFound,
    /// The backing store could not be reached (pool timeout, closed pool, I/O)
    Unavailable,
    /// Any other database failure
    Other,
}

/// Main error type for ctmirror operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure reaching a remote log
    #[error("Network error ({url}): {details}")]
    Network { url: String, details: String },

    /// Malformed or unexpected remote response
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// An individual certificate or structure failed to decode
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Durable-write or read failure
    #[error("Storage error ({kind:?}): {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
    },

    /// Invalid startup configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Remote server answered with a non-success status
    #[error("HTTP error (status {status}): {details}")]
    Http { status: u16, details: String },

    /// Operation exceeded its deadline
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Operation abandoned because shutdown was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// The blob arena accepted fewer bytes than requested
    #[error("Partial blob write: expected {expected} bytes, wrote {written}")]
    BlobShortWrite { expected: usize, written: usize },

    /// The blob arena returned fewer bytes than requested
    #[error("Partial blob read at offset {offset}: expected {expected} bytes")]
    BlobShortRead { offset: u64, expected: usize },

    /// Generic I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Build a storage error of the given kind
    pub fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        SyncError::Storage {
            kind,
            message: message.into(),
        }
    }

    /// Build a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config {
            message: message.into(),
        }
    }

    /// Build a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        SyncError::Protocol {
            message: message.into(),
        }
    }

    /// Build a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        SyncError::Parse {
            message: message.into(),
        }
    }

    /// Storage kind, if this is a storage error
    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            SyncError::Storage { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when a unique constraint rejected the write
    pub fn is_already_exists(&self) -> bool {
        self.storage_kind() == Some(StorageErrorKind::AlreadyExists)
    }

    /// Whether the failure is worth retrying with backoff.
    ///
    /// Network failures, timeouts, rate limiting, server errors and an
    /// unreachable store are transient. Protocol, parse and configuration
    /// errors are not: repeating the same request yields the same answer.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network { .. } | SyncError::Timeout { .. } => true,
            SyncError::Http { status, .. } => *status == 429 || *status >= 500,
            SyncError::Storage { kind, .. } => *kind == StorageErrorKind::Unavailable,
            SyncError::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageErrorKind::AlreadyExists
            }
            sqlx::Error::RowNotFound => StorageErrorKind::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageErrorKind::Unavailable
            }
            _ => StorageErrorKind::Other,
        };
        SyncError::Storage {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_decode() {
            SyncError::Protocol {
                message: format!("Failed to decode response from {}: {}", url, err),
            }
        } else if let Some(status) = err.status() {
            SyncError::Http {
                status: status.as_u16(),
                details: err.to_string(),
            }
        } else {
            SyncError::Network {
                url,
                details: err.to_string(),
            }
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Other(format!("Task join error: {}", err))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config {
            message: format!("Failed to parse config: {}", err),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config {
            message: format!("Invalid URL: {}", err),
        }
    }
}

/// Helper macro for returning a generic error
#[macro_export]
macro_rules! sync_bail {
    ($msg:literal $(,)?) => {
        return Err($crate::error::SyncError::Other($msg.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::SyncError::Other(format!($fmt, $($arg)*)))
    };
}
