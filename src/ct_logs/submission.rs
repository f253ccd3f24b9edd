// Cross-log submission request
//
// Identifies an entry to be re-submitted from one log to another. Only the
// request shape exists; nothing in the sync pipeline selects or processes
// these yet.

use super::sources::LogId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Log the entry was observed in
    pub source_log: LogId,
    /// Log the chain should be submitted to
    pub destination_log: LogId,
    /// Entry index in the source log
    pub entry_number: u64,
}

impl SubmissionRequest {
    pub fn new(source_log: LogId, destination_log: LogId, entry_number: u64) -> Self {
        Self {
            source_log,
            destination_log,
            entry_number,
        }
    }
}
