//! The file-source table (component C): a deduplicating map from content
//! identity to the one on-disc extent that content occupies.

use std::collections::HashMap;
use std::sync::Arc;

use isoforge_common::alg::hash::crc::Crc32HasherIsoHdlc;

use crate::stream::{ContentStream, StreamIdentity};

/// Just under 4 GiB: the largest single extent a directory record's 32-bit
/// length field can describe (ECMA-119 §7.2: `2^31 - (2^31 mod 2048)`).
pub const MAX_EXTENT_SIZE: u64 = (1u64 << 31) - ((1u64 << 31) % 2048);
/// The fixed size of every section but the last, for files split across
/// multiple extents (§4.C).
pub const EXTENT_SIZE: u64 = MAX_EXTENT_SIZE;

/// One contiguous run of blocks holding a section of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSection {
    pub block: u64,
    pub byte_length: u64,
}

/// Computes how many sections a file of `size` bytes needs, per §4.C.
pub fn section_count(size: u64) -> u64 {
    if size <= MAX_EXTENT_SIZE {
        1
    } else {
        (size - MAX_EXTENT_SIZE).div_ceil(EXTENT_SIZE) + 1
    }
}

/// Computes the byte length of each section a file of `size` bytes needs,
/// per §4.C: every section but the last is `EXTENT_SIZE` bytes.
pub fn section_lengths(size: u64) -> Vec<u64> {
    let count = section_count(size);
    let mut lengths = Vec::with_capacity(count as usize);
    let mut remaining = size;
    for _ in 0..count {
        let len = remaining.min(EXTENT_SIZE);
        lengths.push(len);
        remaining -= len;
    }
    lengths
}

/// One entry in the file-source table: the deduplicated record for a unique
/// content-stream identity.
pub struct FileSourceEntry {
    pub stream: Arc<dyn ContentStream>,
    pub sections: Vec<FileSection>,
    pub sort_weight: i64,
    pub came_from_prior_session: bool,
    pub checksum: Option<u32>,
}

impl FileSourceEntry {
    fn new(stream: Arc<dyn ContentStream>, sort_weight: i64) -> Self {
        Self {
            stream,
            sections: Vec::new(),
            sort_weight,
            came_from_prior_session: false,
            checksum: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.stream.size()
    }
}

/// An ordered map keyed by stream identity, built incrementally as the
/// projection trees are walked (§4.C). Insertion is idempotent: a second
/// insertion for the same identity returns the existing entry and raises its
/// sort-weight to the max of the two, so two logical files sharing content
/// end up pointing at one on-disc extent.
#[derive(Default)]
pub struct FileSourceTable {
    index: HashMap<StreamIdentity, usize>,
    entries: Vec<FileSourceEntry>,
}

impl FileSourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `stream` if its identity is new, or folds `sort_weight` into
    /// the existing entry (keeping the max) if not. Returns the entry's
    /// stable index into [`Self::entries`].
    pub fn insert(&mut self, stream: Arc<dyn ContentStream>, sort_weight: i64) -> usize {
        let identity = stream.identity();
        if let Some(&idx) = self.index.get(&identity) {
            let entry = &mut self.entries[idx];
            entry.sort_weight = entry.sort_weight.max(sort_weight);
            return idx;
        }
        let idx = self.entries.len();
        self.entries.push(FileSourceEntry::new(stream, sort_weight));
        self.index.insert(identity, idx);
        idx
    }

    pub fn mark_prior_session(&mut self, idx: usize) {
        self.entries[idx].came_from_prior_session = true;
    }

    pub fn entry(&self, idx: usize) -> &FileSourceEntry {
        &self.entries[idx]
    }

    pub fn entry_mut(&mut self, idx: usize) -> &mut FileSourceEntry {
        &mut self.entries[idx]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Computes and caches a CRC-32 content checksum for every entry that
    /// does not already have one. Optional per §4.C; callers that don't need
    /// checksums never pay for this pass.
    pub fn compute_checksums(&mut self) -> std::io::Result<()> {
        for entry in &mut self.entries {
            if entry.checksum.is_some() {
                continue;
            }
            entry.stream.open()?;
            let mut cursor = 0usize;
            let mut buf = [0u8; 8192];
            let mut all = Vec::new();
            loop {
                let count = entry.stream.read(&mut cursor, &mut buf)?;
                if count == 0 {
                    break;
                }
                all.extend_from_slice(&buf[..count]);
            }
            entry.checksum = Some(Crc32HasherIsoHdlc::checksum(&all));
        }
        Ok(())
    }

    /// Assigns block addresses to every entry, in ascending index order, or
    /// (if `sort_by_weight`) in non-increasing sort-weight order, per §4.C.
    /// Appendable mode (component I) passes entries whose
    /// `came_from_prior_session` is true through unmodified. Returns the
    /// advanced block counter.
    pub fn assign_blocks(
        &mut self,
        mut counter: u64,
        sort_by_weight: bool,
        appendable: bool,
    ) -> u64 {
        let mut order: Vec<usize> = (0..self.entries.len())
            .filter(|&i| !(appendable && self.entries[i].came_from_prior_session))
            .collect();
        if sort_by_weight {
            order.sort_by(|&a, &b| {
                self.entries[b]
                    .sort_weight
                    .cmp(&self.entries[a].sort_weight)
            });
        }
        for idx in order {
            let size = self.entries[idx].size();
            let lengths = section_lengths(size);
            let mut sections = Vec::with_capacity(lengths.len());
            for len in lengths {
                sections.push(FileSection {
                    block: counter,
                    byte_length: len,
                });
                counter += isoforge_io::blocks_for(len);
            }
            self.entries[idx].sections = sections;
        }
        counter
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSourceEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;

    #[test]
    fn dedup_returns_same_index() {
        let mut table = FileSourceTable::new();
        let identity = StreamIdentity::synthetic(42);
        let a = table.insert(Arc::new(MemStream::new(vec![1, 2, 3], identity)), 1);
        let b = table.insert(Arc::new(MemStream::new(vec![1, 2, 3], identity)), 5);
        assert_eq!(a, b);
        assert_eq!(table.entry(a).sort_weight, 5);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn section_count_single_for_small_file() {
        assert_eq!(section_count(2049), 1);
    }

    #[test]
    fn section_count_splits_large_file() {
        assert_eq!(section_count(MAX_EXTENT_SIZE + 1), 2);
    }

    #[test]
    fn assign_blocks_sorts_by_weight_descending() {
        let mut table = FileSourceTable::new();
        let low = table.insert(Arc::new(MemStream::new(vec![0; 2048], StreamIdentity::synthetic(1))), 1);
        let high = table.insert(Arc::new(MemStream::new(vec![0; 2048], StreamIdentity::synthetic(2))), 9);
        table.assign_blocks(20, true, false);
        assert!(table.entry(high).sections[0].block < table.entry(low).sections[0].block);
    }
}
