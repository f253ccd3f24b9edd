// Certificate Transparency Log Sync Module
//
// Incremental mirroring of CT logs: remote access, leaf decoding, trust-root
// classification, chain canonicalization, cursor tracking and the per-log
// fetch/persist pipeline.

pub mod canonicalizer;
pub mod client;
pub mod cursor;
pub mod fetcher;
pub mod parser;
pub mod roots;
pub mod scheduler;
pub mod sources;
pub mod stats;
pub mod submission;

pub use canonicalizer::{CanonicalChain, Canonicalizer, ContentHash, LogEntryPointer};
pub use client::{CtClient, LogApi};
pub use cursor::{CursorTracker, LocalProgress, LogStatus};
pub use fetcher::{EntryFetcher, FetchOutcome};
pub use parser::{EntryType, RawLeafEntry};
pub use roots::{RootMatch, TrustRoots};
pub use scheduler::{LogSync, RoundReport, SyncDaemon, SyncSettings};
pub use sources::{LogId, LogSource};
pub use stats::{MetricsSink, NoopSink, Stats, StatsTracker};
pub use submission::SubmissionRequest;

/// Result type for CT sync operations
pub type Result<T> = std::result::Result<T, crate::error::SyncError>;
