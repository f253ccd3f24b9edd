// Entry canonicalization
//
// Turns a raw leaf entry into the dedup unit (a content-hashed chain record)
// plus a pointer from (log, index) to that chain.

use super::parser::{EntryType, RawLeafEntry};
use super::roots::{RootMatch, TrustRoots};
use super::sources::LogId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// SHA-256 over the ordered byte sequence of a chain
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Digest the parts in order. Chunk boundaries do not affect the result,
    /// only the concatenated byte sequence does.
    pub fn of_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_ref());
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Chain record candidate, keyed by content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalChain {
    pub hash: ContentHash,
    pub entry_type: EntryType,
    /// Matched root DN; `None` means unresolved
    pub root_dn: Option<String>,
    /// A certificate in the chain could not be decoded
    pub unparseable: bool,
    /// Ordered parts: payload, then each chain certificate
    pub parts: Vec<Vec<u8>>,
}

impl CanonicalChain {
    pub fn is_unresolved(&self) -> bool {
        self.root_dn.is_none()
    }

    /// Concatenated ordered byte sequence
    pub fn ordered_bytes(&self) -> Vec<u8> {
        self.parts.concat()
    }
}

/// Pointer candidate from (log, index) to a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogEntryPointer {
    pub log_id: LogId,
    pub index: u64,
    pub chain_hash: ContentHash,
}

/// Per-log canonicalizer, sharing the log's read-only root set
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    log_id: LogId,
    roots: Arc<TrustRoots>,
}

impl Canonicalizer {
    pub fn new(log_id: LogId, roots: Arc<TrustRoots>) -> Self {
        Self { log_id, roots }
    }

    pub fn log_id(&self) -> LogId {
        self.log_id
    }

    /// Canonicalize one raw entry
    pub fn canonicalize(&self, entry: RawLeafEntry) -> (CanonicalChain, LogEntryPointer) {
        let RawLeafEntry {
            index,
            entry_type,
            payload,
            chain,
            ..
        } = entry;

        let mut parts = Vec::with_capacity(chain.len() + 1);
        parts.push(payload);
        parts.extend(chain);
        let hash = ContentHash::of_parts(&parts);

        // Without server-supplied issuers the leaf itself stands in as the chain
        let root = if entry_type == EntryType::Malformed {
            RootMatch {
                root_dn: None,
                unparseable: true,
            }
        } else if parts.len() == 1 {
            self.roots.find_root(&parts[..1])
        } else {
            self.roots.find_root(&parts[1..])
        };

        let chain = CanonicalChain {
            hash,
            entry_type,
            root_dn: root.root_dn,
            unparseable: root.unparseable,
            parts,
        };
        let pointer = LogEntryPointer {
            log_id: self.log_id,
            index,
            chain_hash: hash,
        };
        (chain, pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(index: u64, entry_type: EntryType, payload: &[u8], chain: &[&[u8]]) -> RawLeafEntry {
        RawLeafEntry {
            index,
            timestamp_ms: 0,
            entry_type,
            payload: payload.to_vec(),
            chain: chain.iter().map(|c| c.to_vec()).collect(),
            precertificate: None,
        }
    }

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(LogId([3; 32]), Arc::new(TrustRoots::default()))
    }

    #[test]
    fn test_hash_independent_of_chunking() {
        let whole = ContentHash::of_parts([b"p1p2p3".as_slice()]);
        let split = ContentHash::of_parts([b"p1".as_slice(), b"p2", b"p3"]);
        let uneven = ContentHash::of_parts([b"p".as_slice(), b"1p2p", b"", b"3"]);
        assert_eq!(whole, split);
        assert_eq!(whole, uneven);
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        let c = canonicalizer();
        let (ab, _) = c.canonicalize(raw(0, EntryType::X509Certificate, b"leaf", &[b"A", b"B"]));
        let (ba, _) = c.canonicalize(raw(0, EntryType::X509Certificate, b"leaf", &[b"B", b"A"]));
        assert_ne!(ab.hash, ba.hash);
    }

    #[test]
    fn test_identical_bytes_share_hash_across_indices() {
        let c = canonicalizer();
        let (first, p0) = c.canonicalize(raw(0, EntryType::X509Certificate, b"A", &[]));
        let (second, p2) = c.canonicalize(raw(2, EntryType::X509Certificate, b"A", &[]));
        assert_eq!(first.hash, second.hash);
        assert_eq!(p0.chain_hash, p2.chain_hash);
        assert_eq!(p0.index, 0);
        assert_eq!(p2.index, 2);
    }

    #[test]
    fn test_precert_ordered_bytes() {
        let c = canonicalizer();
        let (chain, pointer) = c.canonicalize(raw(1, EntryType::PreCertificate, b"B", &[b"C"]));
        assert_eq!(chain.ordered_bytes(), b"BC");
        assert_eq!(chain.hash, ContentHash::of_parts([b"BC"]));
        assert_eq!(chain.entry_type, EntryType::PreCertificate);
        assert_eq!(pointer.log_id, LogId([3; 32]));
    }

    #[test]
    fn test_garbage_chain_is_unresolved_and_flagged() {
        let c = canonicalizer();
        let (chain, _) = c.canonicalize(raw(0, EntryType::X509Certificate, b"A", &[]));
        assert!(chain.is_unresolved());
        assert!(chain.unparseable);
        assert_eq!(chain.parts.len(), 1);
    }

    #[test]
    fn test_malformed_entry_skips_root_lookup() {
        let c = canonicalizer();
        let (chain, pointer) =
            c.canonicalize(raw(7, EntryType::Malformed, b"leaf bytes", &[b"extra"]));
        assert_eq!(chain.entry_type, EntryType::Malformed);
        assert!(chain.is_unresolved());
        assert!(chain.unparseable);
        assert_eq!(chain.hash, ContentHash::of_parts([b"leaf bytesextra"]));
        assert_eq!(pointer.index, 7);
    }
}
