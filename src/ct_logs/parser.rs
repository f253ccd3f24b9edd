// CT Log Entry Parser
//
// Decodes get-entries items (RFC 6962 MerkleTreeLeaf + extra_data) into raw
// leaf entries. Certificates are kept as opaque DER; decoding them is the
// canonicalizer's job.

use super::client::CtLogEntryResponse;
use super::Result;
use crate::error::SyncError;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Entry type recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Final X.509 certificate
    X509Certificate,
    /// Pre-certificate (TBS payload)
    PreCertificate,
    /// Leaf that could not be decoded; kept as opaque bytes
    Malformed,
}

impl EntryType {
    /// Wire value of the LogEntryType field
    pub fn code(self) -> Option<u16> {
        match self {
            EntryType::X509Certificate => Some(0),
            EntryType::PreCertificate => Some(1),
            EntryType::Malformed => None,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(EntryType::X509Certificate),
            1 => Some(EntryType::PreCertificate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::X509Certificate => "x509",
            EntryType::PreCertificate => "precert",
            EntryType::Malformed => "malformed",
        }
    }
}

/// A leaf entry as returned by the remote log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLeafEntry {
    /// Entry index in the log
    pub index: u64,
    /// Leaf timestamp (milliseconds since epoch)
    pub timestamp_ms: u64,
    pub entry_type: EntryType,
    /// Leaf certificate DER, or the TBSCertificate for pre-certificates
    pub payload: Vec<u8>,
    /// Issuing certificates in presentation order (possibly empty)
    pub chain: Vec<Vec<u8>>,
    /// Submitted pre-certificate, for pre-certificate entries
    pub precertificate: Option<Vec<u8>>,
}

impl RawLeafEntry {
    /// Leaf timestamp as a UTC datetime
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms as i64)
            .unwrap_or_default()
    }
}

impl RawLeafEntry {
    /// Opaque stand-in for an item that failed to decode: the payload is the
    /// leaf_input bytes and the only chain part is extra_data, when present.
    /// Fields that are not valid base64 are kept as their literal text.
    pub fn malformed(index: u64, entry: &CtLogEntryResponse) -> Self {
        let engine = base64::engine::general_purpose::STANDARD;
        let raw = |field: &str| {
            engine
                .decode(field)
                .unwrap_or_else(|_| field.as_bytes().to_vec())
        };

        let extra = raw(&entry.extra_data);
        Self {
            index,
            timestamp_ms: 0,
            entry_type: EntryType::Malformed,
            payload: raw(&entry.leaf_input),
            chain: if extra.is_empty() { Vec::new() } else { vec![extra] },
            precertificate: None,
        }
    }
}

/// Decode one get-entries item. An item that does not parse is still
/// returned, as a `Malformed` entry, so it is stored and the log advances.
pub fn decode_entry(entry: &CtLogEntryResponse, index: u64) -> RawLeafEntry {
    match parse_entry(entry, index) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Entry {} does not decode, keeping it opaque: {}", index, e);
            RawLeafEntry::malformed(index, entry)
        }
    }
}

/// Parse one get-entries item
pub fn parse_entry(entry: &CtLogEntryResponse, index: u64) -> Result<RawLeafEntry> {
    let engine = base64::engine::general_purpose::STANDARD;
    let leaf = engine
        .decode(&entry.leaf_input)
        .map_err(|e| SyncError::protocol(format!("Failed to decode leaf_input: {}", e)))?;
    let extra = engine
        .decode(&entry.extra_data)
        .map_err(|e| SyncError::protocol(format!("Failed to decode extra_data: {}", e)))?;

    parse_leaf(&leaf, &extra, index)
}

/// Parse a decoded MerkleTreeLeaf and its extra_data
pub fn parse_leaf(leaf: &[u8], extra: &[u8], index: u64) -> Result<RawLeafEntry> {
    let mut reader = Reader::new(leaf);

    // Byte 0: Version (must be 0)
    let version = reader.u8()?;
    if version != 0 {
        return Err(SyncError::protocol(format!(
            "Unsupported leaf version: {}",
            version
        )));
    }

    // Byte 1: MerkleLeafType (must be 0, timestamped_entry)
    let leaf_type = reader.u8()?;
    if leaf_type != 0 {
        return Err(SyncError::protocol(format!(
            "Unsupported leaf type: {}",
            leaf_type
        )));
    }

    let timestamp_ms = reader.u64()?;
    let code = reader.u16()?;
    let entry_type = EntryType::from_code(code)
        .ok_or_else(|| SyncError::protocol(format!("Unknown entry type: {}", code)))?;

    let precert = entry_type == EntryType::PreCertificate;
    let payload = if precert {
        let _issuer_key_hash = reader.take(32)?;
        reader.opaque24()?.to_vec()
    } else {
        reader.opaque24()?.to_vec()
    };

    let mut extra_reader = Reader::new(extra);
    let precertificate = if precert {
        Some(extra_reader.opaque24()?.to_vec())
    } else {
        None
    };
    let chain = extra_reader.cert_list()?;

    Ok(RawLeafEntry {
        index,
        timestamp_ms,
        entry_type,
        payload,
        chain,
        precertificate,
    })
}

/// Bounds-checked big-endian reader over TLS-style encodings
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(SyncError::protocol(format!(
                "Truncated leaf: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            ))),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]) as usize)
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn opaque24(&mut self) -> Result<&'a [u8]> {
        let len = self.u24()?;
        self.take(len)
    }

    /// ASN.1Cert list<0..2^24-1>
    fn cert_list(&mut self) -> Result<Vec<Vec<u8>>> {
        let list = self.opaque24()?;
        let mut inner = Reader::new(list);
        let mut certs = Vec::new();
        while inner.pos < list.len() {
            certs.push(inner.opaque24()?.to_vec());
        }
        Ok(certs)
    }
}

/// Test helpers for building wire-format entries
#[cfg(test)]
pub(crate) mod encode {
    use super::EntryType;

    fn push_u24(out: &mut Vec<u8>, len: usize) {
        out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    }

    fn opaque24(out: &mut Vec<u8>, bytes: &[u8]) {
        push_u24(out, bytes.len());
        out.extend_from_slice(bytes);
    }

    fn cert_list(out: &mut Vec<u8>, certs: &[Vec<u8>]) {
        let mut list = Vec::new();
        for cert in certs {
            opaque24(&mut list, cert);
        }
        opaque24(out, &list);
    }

    pub fn leaf(entry_type: EntryType, timestamp_ms: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8, 0u8];
        out.extend_from_slice(&timestamp_ms.to_be_bytes());
        out.extend_from_slice(&entry_type.code().unwrap().to_be_bytes());
        if entry_type == EntryType::PreCertificate {
            out.extend_from_slice(&[0xAA; 32]);
        }
        opaque24(&mut out, payload);
        // empty CtExtensions
        out.extend_from_slice(&[0, 0]);
        out
    }

    pub fn extra(entry_type: EntryType, precert: &[u8], chain: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        if entry_type == EntryType::PreCertificate {
            opaque24(&mut out, precert);
        }
        cert_list(&mut out, chain);
        out
    }
}
