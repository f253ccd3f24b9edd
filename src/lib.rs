// ctmirror - Incremental Certificate Transparency log mirror
// Licensed under GPL-3.0

//! ctmirror keeps a local, deduplicated copy of one or more Certificate
//! Transparency logs. Every distinct certificate chain is stored once, keyed
//! by a content hash, with a pointer per `(log, index)` and the set of logs
//! that have published it.

pub mod cli;
pub mod commands;
pub mod config;
pub mod ct_logs;
pub mod db;
pub mod error;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use crate::cli::Args;
pub use crate::config::AppConfig;
pub use crate::error::SyncError;

/// Result type for ctmirror operations
pub type Result<T> = std::result::Result<T, SyncError>;
