// Raw certificate byte storage
//
// Durable backing for certificate content, addressed by offset and length.

pub mod blob;

pub use blob::{BlobRef, BlobStore};
