// Append-only blob arena
//
// A single growable file shared by every log. Bytes are only ever appended;
// the returned (offset, length) pair is a permanent content address. There is
// no compaction, truncation or in-place rewrite.

use crate::error::SyncError;
use crate::Result;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Permanent address of a blob inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub offset: u64,
    pub length: u64,
}

/// Append-only, offset-addressed byte arena
///
/// The write cursor lives behind the lock: appends hold it exclusively, reads
/// hold it shared, so a reader never observes a half-advanced cursor.
pub struct BlobStore {
    path: PathBuf,
    file: File,
    cursor: RwLock<u64>,
}

impl BlobStore {
    /// Open (or create) the arena at `path`. The write cursor starts at the
    /// file's current length.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();

        debug!(path = %path.display(), len, "opened blob arena");

        Ok(Self {
            path,
            file,
            cursor: RwLock::new(len),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current arena length (the next append offset)
    pub fn len(&self) -> u64 {
        match self.cursor.read() {
            Ok(cursor) => *cursor,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// True when nothing has been appended yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `bytes` and return their starting offset.
    ///
    /// The bytes are on stable storage before the reference is returned, so a
    /// reopened arena never hands the same offset out twice. A short write is
    /// a hard error; the cursor is not advanced so the partial bytes are
    /// overwritten by the next append.
    pub fn append(&self, bytes: &[u8]) -> Result<BlobRef> {
        let mut cursor = self
            .cursor
            .write()
            .map_err(|_| SyncError::Other("blob arena lock poisoned".to_string()))?;

        let offset = *cursor;
        let written = write_at(&self.file, bytes, offset)?;
        if written != bytes.len() {
            return Err(SyncError::BlobShortWrite {
                expected: bytes.len(),
                written,
            });
        }
        self.file.sync_data()?;

        *cursor += bytes.len() as u64;
        Ok(BlobRef {
            offset,
            length: bytes.len() as u64,
        })
    }

    /// Read exactly `length` bytes starting at `offset`.
    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let cursor = self
            .cursor
            .read()
            .map_err(|_| SyncError::Other("blob arena lock poisoned".to_string()))?;

        let expected = length as usize;
        let end = offset.checked_add(length);
        if end.map_or(true, |end| end > *cursor) {
            return Err(SyncError::BlobShortRead { offset, expected });
        }

        let mut buf = vec![0u8; expected];
        read_exact_at(&self.file, &mut buf, offset).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SyncError::BlobShortRead { offset, expected }
            } else {
                SyncError::from(e)
            }
        })?;
        Ok(buf)
    }

    /// Read a blob by reference
    pub fn get(&self, blob: BlobRef) -> Result<Vec<u8>> {
        self.read(blob.offset, blob.length)
    }

    /// Flush appended data to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// `append` on the blocking pool, for async callers
    pub async fn append_owned(self: &Arc<Self>, bytes: Vec<u8>) -> Result<BlobRef> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.append(&bytes)).await?
    }

    /// Read several blobs in order on the blocking pool
    pub async fn get_many(self: &Arc<Self>, blobs: Vec<BlobRef>) -> Result<Vec<Vec<u8>>> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || blobs.into_iter().map(|blob| store.get(blob)).collect())
            .await?
    }
}

#[cfg(unix)]
fn write_at(file: &File, bytes: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(bytes, offset)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, bytes: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(bytes, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0;
    while filled < buf.len() {
        match file.seek_read(&mut buf[filled..], offset + filled as u64)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => filled += n,
        }
    }
    Ok(())
}
