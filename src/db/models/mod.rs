// Database Models Module
// Re-exports all database model types

pub mod certificate;
pub mod chain;

pub use certificate::{CertificateRecord, ChainCertificateRecord};
pub use chain::{ChainRecord, ChainUpsert, LogEntryRecord, NewChain};
