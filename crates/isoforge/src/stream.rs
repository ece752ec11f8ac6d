//! Content streams (component B): byte-producing handles that back regular
//! files, with a stable identity used for deduplication in
//! [`crate::source`] and an explicit repeatability contract filters rely on.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

/// A dedup key for a content stream: `(filesystem-id, device-id,
/// inode-id)`. Two streams with equal identities are assumed to produce
/// equal bytes and are folded into one file-source entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamIdentity {
    pub filesystem_id: u64,
    pub device_id: u64,
    pub inode_id: u64,
}

impl StreamIdentity {
    pub const fn new(filesystem_id: u64, device_id: u64, inode_id: u64) -> Self {
        Self {
            filesystem_id,
            device_id,
            inode_id,
        }
    }

    /// A synthetic identity for in-memory content, where there is no host
    /// inode to key on. `discriminant` lets callers that build several
    /// distinct in-memory buffers keep them from colliding.
    pub const fn synthetic(discriminant: u64) -> Self {
        Self::new(0, 0, discriminant)
    }
}

/// Result of [`ContentStream::open`]: whether the stream's actual size
/// matches what was cached when layout was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDrift {
    Matches,
    Grew,
    Shrank,
}

/// A byte-producing handle, per §4.B. Implementors back regular files
/// (`FsStream`), in-memory buffers (`MemStream`), or wrap another stream to
/// transform its bytes (filters, see [`crate::filter`]).
pub trait ContentStream: Send + Sync {
    /// Opens the stream, reporting whether its size has drifted from the
    /// value cached at layout time.
    fn open(&self) -> io::Result<SizeDrift>;

    /// Reads up to `buf.len()` bytes, returning the count read. Per §4.B, at
    /// most one short read is permitted: once fewer bytes than requested are
    /// returned, the next call must return `0` (EOF).
    fn read(&self, cursor: &mut usize, buf: &mut [u8]) -> io::Result<usize>;

    /// The dedup key backing this stream's content.
    fn identity(&self) -> StreamIdentity;

    /// True iff two successive open→read-to-EOF→close sequences yield
    /// identical bytes. Filters require this of their input.
    fn repeatable(&self) -> bool;

    /// Cached after first query; stable thereafter unless the caller
    /// explicitly invalidates it before emission begins.
    fn size(&self) -> u64;
}

/// An in-memory content stream, e.g. a synthesized boot catalog or a file
/// staged directly from caller-owned bytes.
#[derive(Debug, Clone)]
pub struct MemStream {
    data: Arc<Vec<u8>>,
    identity: StreamIdentity,
}

impl MemStream {
    pub fn new(data: Vec<u8>, identity: StreamIdentity) -> Self {
        Self {
            data: Arc::new(data),
            identity,
        }
    }
}

impl ContentStream for MemStream {
    fn open(&self) -> io::Result<SizeDrift> {
        Ok(SizeDrift::Matches)
    }

    fn read(&self, cursor: &mut usize, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[(*cursor).min(self.data.len())..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        *cursor += count;
        Ok(count)
    }

    fn identity(&self) -> StreamIdentity {
        self.identity
    }

    fn repeatable(&self) -> bool {
        true
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A content stream backed by a host filesystem path, opened and read lazily
/// so the emission producer does not hold every file descriptor at once.
#[derive(Debug, Clone)]
pub struct FsStream {
    path: PathBuf,
    identity: StreamIdentity,
    cached_size: u64,
}

impl FsStream {
    pub fn new(path: PathBuf, identity: StreamIdentity, cached_size: u64) -> Self {
        Self {
            path,
            identity,
            cached_size,
        }
    }
}

impl ContentStream for FsStream {
    fn open(&self) -> io::Result<SizeDrift> {
        let actual = fs::metadata(&self.path)?.len();
        Ok(match actual.cmp(&self.cached_size) {
            std::cmp::Ordering::Equal => SizeDrift::Matches,
            std::cmp::Ordering::Greater => SizeDrift::Grew,
            std::cmp::Ordering::Less => SizeDrift::Shrank,
        })
    }

    fn read(&self, cursor: &mut usize, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = fs::File::open(&self.path)?;
        file.seek_relative(*cursor as i64)?;
        let count = file.read(buf)?;
        *cursor += count;
        Ok(count)
    }

    fn identity(&self) -> StreamIdentity {
        self.identity
    }

    fn repeatable(&self) -> bool {
        true
    }

    fn size(&self) -> u64 {
        self.cached_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_stream_reads_full_buffer_then_eof() {
        let stream = MemStream::new(vec![1, 2, 3, 4], StreamIdentity::synthetic(1));
        let mut cursor = 0;
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut cursor, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(stream.read(&mut cursor, &mut buf).unwrap(), 0);
    }

    #[test]
    fn identity_round_trips() {
        let id = StreamIdentity::new(1, 2, 42);
        let stream = MemStream::new(vec![], id);
        assert_eq!(stream.identity(), id);
    }
}
