//! The filter pipeline (component H): optional per-file transforms applied
//! between a [`crate::stream::ContentStream`] and the bytes actually written
//! to disc, such as zisofs-style compression.
//!
//! A filter wraps another stream rather than replacing it, so the chain can
//! be built up generically: `CompressionFilter::wrap(fs_stream)` is itself a
//! `ContentStream` and can be inserted into [`crate::source::FileSourceTable`]
//! exactly like any other source.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::stream::{ContentStream, SizeDrift, StreamIdentity};

/// Raised when a filter's input violates a precondition it depends on (most
/// commonly: a non-repeatable stream handed to a filter that must read its
/// input more than once to size it).
#[derive(Debug, thiserror::Error)]
#[error("filter input stream does not meet this filter's precondition")]
pub struct FilterWrongInput;

/// zisofs's per-block header: a 16-byte fixed prologue (magic, uncompressed
/// size, header size log2, block size log2) followed by a 32-bit
/// little-endian pointer table, one entry per block plus a trailing
/// end-of-data pointer.
const ZISOFS_MAGIC: [u8; 8] = [0x37, 0xE4, 0x53, 0x96, 0xC9, 0xDB, 0xD6, 0x07];
const ZISOFS_BLOCK_SIZE_LOG2: u8 = 15; // 32 KiB blocks, the libisofs default

/// Compresses a stream's bytes into the zisofs block format: the stream is
/// split into fixed-size blocks, each deflated independently so a reader can
/// decompress any single block without having read the ones before it. A
/// block that deflates to nothing (all zero input) is stored as a
/// zero-length pointer run rather than an empty deflate stream, so readers
/// can special-case it without invoking zlib at all.
pub struct CompressionFilter {
    inner: Arc<dyn ContentStream>,
    compressed: Mutex<Option<Arc<Vec<u8>>>>,
    identity: StreamIdentity,
}

impl CompressionFilter {
    /// Wraps `inner`. `inner` must be repeatable, since computing the
    /// compressed size requires a full read-through before any byte is
    /// handed to the writer chain.
    pub fn wrap(inner: Arc<dyn ContentStream>) -> Result<Self, FilterWrongInput> {
        if !inner.repeatable() {
            return Err(FilterWrongInput);
        }
        let identity = inner.identity();
        Ok(Self {
            inner,
            compressed: Mutex::new(None),
            identity,
        })
    }

    fn compress(&self) -> io::Result<Arc<Vec<u8>>> {
        let mut guard = self.compressed.lock().unwrap();
        if let Some(data) = &*guard {
            return Ok(data.clone());
        }

        self.inner.open()?;
        let mut raw = Vec::new();
        let mut cursor = 0usize;
        let mut buf = [0u8; 8192];
        loop {
            let count = self.inner.read(&mut cursor, &mut buf)?;
            if count == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..count]);
        }

        let block_size = 1usize << ZISOFS_BLOCK_SIZE_LOG2;
        let block_count = raw.len().div_ceil(block_size.max(1)).max(1);

        let mut pointers = Vec::with_capacity(block_count + 1);
        let mut payload = Vec::new();

        let header_size = 16 + 4 * (block_count + 1);
        for chunk in raw.chunks(block_size).chain(std::iter::empty()) {
            pointers.push(header_size as u32 + payload.len() as u32);
            if chunk.iter().all(|&b| b == 0) {
                continue;
            }
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(chunk)?;
            let deflated = encoder.finish()?;
            payload.extend_from_slice(&deflated);
        }
        pointers.push(header_size as u32 + payload.len() as u32);

        let mut out = Vec::with_capacity(header_size + payload.len());
        out.extend_from_slice(&ZISOFS_MAGIC);
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.push(4); // header_size_log2: pointer table is 32-bit-aligned
        out.push(ZISOFS_BLOCK_SIZE_LOG2);
        out.extend_from_slice(&[0u8; 2]); // reserved
        for ptr in pointers {
            out.extend_from_slice(&ptr.to_le_bytes());
        }
        out.extend_from_slice(&payload);

        let data = Arc::new(out);
        *guard = Some(data.clone());
        Ok(data)
    }
}

impl ContentStream for CompressionFilter {
    fn open(&self) -> io::Result<SizeDrift> {
        self.compress()?;
        Ok(SizeDrift::Matches)
    }

    fn read(&self, cursor: &mut usize, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.compress()?;
        let remaining = &data[(*cursor).min(data.len())..];
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
        self.compress().map(|d| d.len() as u64).unwrap_or(0)
    }
}

/// Runs an external command over a stream's bytes, piping the stream to the
/// command's stdin and capturing stdout as the filtered content. Used for
/// caller-supplied filters (e.g. an external codec) that don't warrant a
/// bespoke in-process implementation.
pub struct ExternalCommandFilter {
    inner: Arc<dyn ContentStream>,
    program: String,
    args: Vec<String>,
    output: Mutex<Option<Arc<Vec<u8>>>>,
    identity: StreamIdentity,
}

impl ExternalCommandFilter {
    pub fn wrap(
        inner: Arc<dyn ContentStream>,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Result<Self, FilterWrongInput> {
        if !inner.repeatable() {
            return Err(FilterWrongInput);
        }
        let identity = inner.identity();
        Ok(Self {
            inner,
            program: program.into(),
            args,
            output: Mutex::new(None),
            identity,
        })
    }

    fn run(&self) -> io::Result<Arc<Vec<u8>>> {
        let mut guard = self.output.lock().unwrap();
        if let Some(data) = &*guard {
            return Ok(data.clone());
        }

        self.inner.open()?;
        let mut raw = Vec::new();
        let mut cursor = 0usize;
        let mut buf = [0u8; 8192];
        loop {
            let count = self.inner.read(&mut cursor, &mut buf)?;
            if count == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..count]);
        }

        let mut child = std::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()?;
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(&raw)?;
        let output = child.wait_with_output()?;
        let data = Arc::new(output.stdout);
        *guard = Some(data.clone());
        Ok(data)
    }
}

impl ContentStream for ExternalCommandFilter {
    fn open(&self) -> io::Result<SizeDrift> {
        self.run()?;
        Ok(SizeDrift::Matches)
    }

    fn read(&self, cursor: &mut usize, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.run()?;
        let remaining = &data[(*cursor).min(data.len())..];
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
        self.run().map(|d| d.len() as u64).unwrap_or(0)
    }
}

/// Which reduction threshold governs whether a compressed stream actually
/// replaces its uncompressed counterpart, per §4.H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionPolicy {
    /// Install the filter only if total file size drops.
    IfReduction,
    /// Install the filter only if it drops the block count (i.e. saves at
    /// least one 2048-byte block), tolerating byte-level overhead.
    IfBlockReduction,
}

/// Decides whether a filtered stream should replace `original` under
/// `policy`, given both sizes.
pub fn should_install(policy: ReductionPolicy, original_size: u64, filtered_size: u64) -> bool {
    match policy {
        ReductionPolicy::IfReduction => filtered_size < original_size,
        ReductionPolicy::IfBlockReduction => {
            isoforge_io::blocks_for(filtered_size) < isoforge_io::blocks_for(original_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;

    #[test]
    fn compressing_zero_block_produces_zero_length_pointer_run() {
        let inner: Arc<dyn ContentStream> = Arc::new(MemStream::new(
            vec![0u8; 64 * 1024],
            StreamIdentity::synthetic(1),
        ));
        let filter = CompressionFilter::wrap(inner).unwrap();
        let size = filter.size();
        assert!(size > 0);
        assert!(size < 64 * 1024);
    }

    #[test]
    fn non_repeatable_stream_is_rejected() {
        struct OnceStream;
        impl ContentStream for OnceStream {
            fn open(&self) -> io::Result<SizeDrift> {
                Ok(SizeDrift::Matches)
            }
            fn read(&self, _cursor: &mut usize, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn identity(&self) -> StreamIdentity {
                StreamIdentity::synthetic(99)
            }
            fn repeatable(&self) -> bool {
                false
            }
            fn size(&self) -> u64 {
                0
            }
        }
        let inner: Arc<dyn ContentStream> = Arc::new(OnceStream);
        assert!(CompressionFilter::wrap(inner).is_err());
    }

    #[test]
    fn should_install_respects_block_reduction_policy() {
        assert!(!should_install(ReductionPolicy::IfBlockReduction, 2048, 2047));
        assert!(should_install(ReductionPolicy::IfBlockReduction, 4096, 2048));
    }
}
