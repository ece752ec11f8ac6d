//! Session/multisession glue (component I): appending a new session onto an
//! existing image without rewriting the blocks a prior session already
//! occupies.
//!
//! The wrinkle this component exists to solve is that a handful of fields
//! near the front of the image (the primary volume descriptor's own
//! checksums and a few vendor-specific bytes some burning tools expect)
//! sometimes need a byte or two patched in blocks that were already written
//! in a prior session and therefore cannot be rewritten on read-only media.
//! Those patches are collected into a small overwrite buffer during a dry
//! run and replayed by the caller against the start of the previous session.

use std::collections::BTreeMap;

/// The default size of the overwrite buffer, matching the 64 KiB window
/// libisofs budgets for vendor "tail patch" writes, per §4.I.
pub const DEFAULT_OVERWRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A single patch: `offset` bytes into the prior session, replace with
/// `bytes`.
#[derive(Debug, Clone)]
pub struct OverwritePatch {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// Accumulates patches discovered during a dry run of the writer chain, then
/// hands them back as one contiguous buffer the caller overlays onto the
/// start of the prior session.
#[derive(Debug, Default)]
pub struct OverwriteBuffer {
    patches: BTreeMap<u64, Vec<u8>>,
    capacity: usize,
}

impl OverwriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            patches: BTreeMap::new(),
            capacity,
        }
    }

    /// Records a patch at `offset`. Panics if `offset + bytes.len()` would
    /// exceed the buffer's capacity: the caller is expected to have sized
    /// the buffer generously up front (§6 default: 64 KiB, minimum 32
    /// blocks).
    pub fn patch(&mut self, offset: u64, bytes: Vec<u8>) {
        assert!(
            offset as usize + bytes.len() <= self.capacity,
            "overwrite patch at {offset} (len {}) exceeds overwrite buffer capacity {}",
            bytes.len(),
            self.capacity
        );
        self.patches.insert(offset, bytes);
    }

    /// Flattens all recorded patches into one buffer of `self.capacity`
    /// bytes, with unpatched regions left as `fill`.
    pub fn flatten(&self, fill: u8) -> Vec<u8> {
        let mut out = vec![fill; self.capacity];
        for (&offset, bytes) in &self.patches {
            let start = offset as usize;
            out[start..start + bytes.len()].copy_from_slice(bytes);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Records as much of `bytes` (starting at `offset`) as fits in the
    /// buffer, truncating instead of panicking. Used when capturing a whole
    /// preamble (system area plus volume descriptor set) rather than a
    /// single hand-placed patch, where the caller's chosen capacity is
    /// outside the writer's control.
    pub fn capture(&mut self, offset: u64, bytes: &[u8]) {
        let start = offset as usize;
        if start >= self.capacity || bytes.is_empty() {
            return;
        }
        let end = (start + bytes.len()).min(self.capacity);
        self.patch(offset, bytes[..end - start].to_vec());
    }
}

/// Multisession parameters: where the new session's blocks begin, and
/// whether the file-source table should skip entries carried over from the
/// prior session untouched (§4.I, folded into
/// [`crate::source::FileSourceTable::assign_blocks`]'s `appendable` flag).
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub start_lba: u64,
    pub appendable: bool,
    pub overwrite_buffer_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            start_lba: 0,
            appendable: false,
            overwrite_buffer_size: DEFAULT_OVERWRITE_BUFFER_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_fills_gaps_and_keeps_patches() {
        let mut buf = OverwriteBuffer::new(16);
        buf.patch(4, vec![1, 2]);
        let flat = buf.flatten(0);
        assert_eq!(flat.len(), 16);
        assert_eq!(&flat[4..6], &[1, 2]);
        assert_eq!(flat[0], 0);
    }

    #[test]
    #[should_panic]
    fn patch_beyond_capacity_panics() {
        let mut buf = OverwriteBuffer::new(4);
        buf.patch(2, vec![1, 2, 3]);
    }

    #[test]
    fn capture_truncates_instead_of_panicking() {
        let mut buf = OverwriteBuffer::new(4);
        buf.capture(0, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.flatten(0), vec![1, 2, 3, 4]);
    }
}
