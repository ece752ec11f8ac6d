//! The writer chain (component E) and layout planner (component F).
//!
//! The chain is a fixed sequence of writers — primary volume descriptor,
//! optional boot record, optional Joliet supplementary descriptor,
//! terminator, path tables, directory records, file data — each
//! contributing to the same output in the same order every time. Layout is
//! planned in two passes: the first computes every directory's own
//! record-block size bottom-up from its child count, the second walks
//! directories in path-table order (breadth-first, so every directory at a
//! shallower level gets a block before any deeper one) assigning absolute
//! LBAs, which is what lets a path-table entry or a "." / ".." record point
//! at a block a later step in the same pass produced.
//!
//! Directories are flattened into an arena indexed by position rather than
//! walked in place, because path-table order cuts across the tree's own
//! parent/child shape (every directory at depth 1 must be numbered before
//! any at depth 2) and an arena makes that reordering a matter of
//! `Vec` indices instead of juggling simultaneous mutable borrows of a
//! nested tree.

use std::collections::VecDeque;
use std::io::{Seek, SeekFrom, Write};

use isoforge_io::BLOCK_SIZE;

use crate::directory::{DirectoryRecord, DirectoryRef, FileFlags};
use crate::extension::ExtensionChain;
use crate::path::PathTableEntry;
use crate::projection::{ProjectionNode, ProjectionNodeKind, ProjectionTree};
use crate::source::FileSourceTable;
use crate::tree::NodeId;
use crate::types::{EndianType, IsoStringFile};
use crate::volume::VolumeDescriptorList;

/// A destination a writer can both write to and seek within. Kept as a
/// small local trait (rather than reusing `isoforge_io::ReadWriteSeek`,
/// which also requires `Read`) so the writer chain only demands what it
/// actually uses, and so `dyn WriteSeek` stays object-safe.
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek> WriteSeek for T {}

/// The minimum size of any image, in blocks, measured from the session's
/// own start LBA (not block zero, for a multisession image) — §8's
/// size-floor invariant.
const MIN_IMAGE_BLOCKS: u64 = 32;

/// Errors raised while planning or emitting the image, per §7.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("volume space size {0} blocks exceeds the 32-bit block-count field")]
    VolumeTooLarge(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Projection(#[from] crate::projection::ProjectionError),
}

/// A reference to one child of an arena directory: either another arena
/// directory or a file-source-table entry.
#[derive(Debug, Clone, Copy)]
enum ChildRef {
    Dir(usize),
    File(usize),
}

struct ArenaDir {
    name: String,
    parent: usize,
    children: Vec<(String, ChildRef, Option<NodeId>)>,
    block: u64,
    /// Blocks holding this directory's own "." / ".." / child records.
    main_blocks: u64,
    /// Blocks reserved immediately after `main_blocks` for extension
    /// system-use entries that didn't fit inline (§4.F/§4.J). Zero unless
    /// an extension reports a nonzero [`ExtensionChain::continuation_area_blocks`]
    /// for one of this directory's children.
    continuation_blocks: u64,
}

impl ArenaDir {
    fn total_blocks(&self) -> u64 {
        self.main_blocks + self.continuation_blocks
    }
}

/// Flattens a projection tree's directories into breadth-first,
/// path-table order. Index `0` is always the root. A directory's own
/// children are kept in the order the projection builder already sorted
/// them in, so no re-sort is needed here.
fn build_arena(tree: &ProjectionTree) -> Vec<ArenaDir> {
    let mut arena = vec![ArenaDir {
        name: String::new(),
        parent: 0,
        children: Vec::new(),
        block: 0,
        main_blocks: 0,
        continuation_blocks: 0,
    }];
    let mut queue: VecDeque<(usize, &ProjectionNode)> = VecDeque::new();
    queue.push_back((0, &tree.root));

    while let Some((idx, node)) = queue.pop_front() {
        let ProjectionNodeKind::Directory { children } = &node.kind else {
            continue;
        };
        let mut refs = Vec::with_capacity(children.len());
        for child in children {
            match &child.kind {
                ProjectionNodeKind::Directory { .. } => {
                    let child_idx = arena.len();
                    arena.push(ArenaDir {
                        name: child.name.clone(),
                        parent: idx,
                        children: Vec::new(),
                        block: 0,
                        main_blocks: 0,
                        continuation_blocks: 0,
                    });
                    refs.push((child.name.clone(), ChildRef::Dir(child_idx), child.node_id));
                    queue.push_back((child_idx, child));
                }
                ProjectionNodeKind::File { source_index } => {
                    refs.push((child.name.clone(), ChildRef::File(*source_index), child.node_id));
                }
            }
        }
        arena[idx].children = refs;
    }
    arena
}

/// Computes how many whole blocks a directory's own record list needs, plus
/// how many continuation-area blocks its children's extension suffixes
/// require. Two fixed-size self/parent records come first, then one
/// variable-length record per entry (a directory record may not straddle a
/// block boundary), widened by whatever extension suffix fits within the
/// 255-byte record-length field (§4.J); a suffix that would overflow is
/// dropped from the record (logged), per §7's extension-violation recovery,
/// while still counting its continuation-area request.
fn dir_record_block_count(
    children: &[(String, ChildRef, Option<NodeId>)],
    extensions: &ExtensionChain,
) -> (u64, u64) {
    let self_record_len = (size_of::<crate::directory::DirectoryRecordHeader>() + 1 + 1) & !1;
    let mut total = self_record_len * 2; // "." and ".."
    let mut used_in_block = total;
    let mut continuation_blocks = 0u64;
    for (name, _, node_id) in children {
        let base_len = (size_of::<crate::directory::DirectoryRecordHeader>() + name.len() + 1) & !1;
        let mut len = base_len;
        if let Some(id) = node_id {
            let suffix = suffix_len_for(extensions, *id, base_len, &mut continuation_blocks);
            if suffix > 0 {
                len = (base_len + suffix + 1) & !1;
            }
        }
        if used_in_block + len > BLOCK_SIZE {
            total += BLOCK_SIZE - used_in_block;
            used_in_block = 0;
        }
        total += len;
        used_in_block += len;
    }
    (isoforge_io::blocks_for(total as u64), continuation_blocks)
}

/// How many extra bytes to reserve inline in a directory record for `id`'s
/// extension suffix, given `record_len_so_far` bytes already spoken for. A
/// suffix that would push the record past the 255-byte ceiling is dropped
/// (§7: "Extension violation ... Drop the extension on the affected node,
/// continue"), while its reported continuation-area block need is still
/// added to `continuation_blocks` so the reservation mechanism stays
/// available to an extension that manages its own out-of-line content.
fn suffix_len_for(
    extensions: &ExtensionChain,
    id: NodeId,
    record_len_so_far: usize,
    continuation_blocks: &mut u64,
) -> usize {
    match extensions.suffix_len(id) {
        Ok(0) => 0,
        Ok(suffix) if record_len_so_far + suffix <= 255 => suffix,
        Ok(suffix) => {
            log::warn!(
                "directory entry extension suffix of {suffix} bytes would overflow the 255-byte \
                 record limit; dropping it from the record"
            );
            *continuation_blocks += extensions.continuation_area_blocks(id);
            0
        }
        Err(err) => {
            log::warn!("dropping directory entry extension suffix: {err}");
            0
        }
    }
}

/// The result of running the layout planner: every directory's block
/// address is fixed, and the volume's total block count is known.
pub struct LayoutResult {
    pub l_path_table_block: u64,
    pub m_path_table_block: u64,
    pub path_table_size: u64,
    pub total_blocks: u64,
}

/// Runs the two-pass layout planner (component F) over a built projection
/// tree. Returns the layout summary, the arena (kept crate-private — only
/// [`emit_image`] and the streaming producer in `pipeline` need it), and the
/// path-table entries ready to serialize.
pub(crate) struct Planned {
    arena: Vec<ArenaDir>,
    pub(crate) layout: LayoutResult,
    path_entries: Vec<PathTableEntry>,
}

impl Planned {
    /// The root directory's final extent, once layout has run.
    pub(crate) fn root(&self) -> DirectoryRef {
        let root = &self.arena[0];
        DirectoryRef {
            offset: root.block,
            size: root.main_blocks * BLOCK_SIZE as u64,
        }
    }

    /// Patches a primary volume descriptor's layout-dependent fields in
    /// place, once the final total block count (which may have grown past
    /// `self.layout.total_blocks` if a caller appended more content, such as
    /// an El Torito catalog staged outside the projection tree) is known.
    pub(crate) fn patch_primary(&self, pvd: &mut crate::volume::PrimaryVolumeDescriptor, total_blocks: u64) {
        pvd.volume_space_size = crate::types::U32LsbMsb::new(total_blocks as u32);
        pvd.path_table_size = crate::types::U32LsbMsb::new(self.layout.path_table_size as u32);
        pvd.type_l_path_table =
            crate::types::U32::<crate::types::LittleEndian>::new(self.layout.l_path_table_block as u32);
        pvd.type_m_path_table =
            crate::types::U32::<crate::types::BigEndian>::new(self.layout.m_path_table_block as u32);
        let root = &self.arena[0];
        pvd.dir_record.header.extent = crate::types::U32LsbMsb::new(root.block as u32);
        pvd.dir_record.header.data_len =
            crate::types::U32LsbMsb::new((root.main_blocks * BLOCK_SIZE as u64) as u32);
    }
}

pub(crate) fn plan(
    tree: &ProjectionTree,
    sources: &mut FileSourceTable,
    mut next_block: u64,
    base_block: u64,
    sort_files_by_weight: bool,
    appendable: bool,
    extensions: &ExtensionChain,
) -> Result<Planned, WriterError> {
    let mut arena = build_arena(tree);

    // Pass 1: each directory's own block count, independent of any LBA.
    for i in 0..arena.len() {
        let (main, continuation) = dir_record_block_count(&arena[i].children, extensions);
        arena[i].main_blocks = main.max(1);
        arena[i].continuation_blocks = continuation;
    }

    let path_table_size: u64 = arena
        .iter()
        .map(|d| {
            PathTableEntry {
                length: d.name.len() as u8,
                extended_attr_record: 0,
                parent_lba: 0,
                parent_index: 0,
                name: d.name.clone(),
            }
            .size() as u64
        })
        .sum();

    let l_path_table_block = next_block;
    next_block += isoforge_io::blocks_for(path_table_size).max(1);
    let m_path_table_block = next_block;
    next_block += isoforge_io::blocks_for(path_table_size).max(1);

    // Pass 2: walk in path-table (arena) order assigning LBAs — every
    // directory at a shallower level already has a block by the time a
    // deeper one needs its parent pointer.
    for i in 0..arena.len() {
        arena[i].block = next_block;
        next_block += arena[i].total_blocks();
    }

    next_block = sources.assign_blocks(next_block, sort_files_by_weight, appendable);

    // Padding writer (component E member #6, §4.E): every image is at least
    // 32 blocks, per §8's size-floor invariant, regardless of how little
    // content it actually holds (scenario 1: an empty image is still 32
    // blocks). The gap between the last real content block and this floor
    // is written as zeros by `write_body`'s final forward seek.
    next_block = next_block.max(base_block + MIN_IMAGE_BLOCKS);

    if next_block > u32::MAX as u64 {
        return Err(WriterError::VolumeTooLarge(next_block));
    }

    let path_entries: Vec<PathTableEntry> = arena
        .iter()
        .enumerate()
        .map(|(i, d)| PathTableEntry {
            length: d.name.len() as u8,
            extended_attr_record: 0,
            parent_lba: arena[d.parent].block as u32,
            parent_index: (d.parent + 1) as u16,
            name: if i == 0 { String::new() } else { d.name.clone() },
        })
        .collect();

    Ok(Planned {
        arena,
        layout: LayoutResult {
            l_path_table_block,
            m_path_table_block,
            path_table_size,
            total_blocks: next_block,
        },
        path_entries,
    })
}

/// Writes the L-table (little-endian fields) or M-table (big-endian
/// fields), selected by `endian`, at the current seek position.
pub(crate) fn write_path_table<W: WriteSeek>(
    out: &mut W,
    entries: &[PathTableEntry],
    endian: EndianType,
) -> Result<(), WriterError> {
    for entry in entries {
        out.write_all(&entry.to_bytes(endian))?;
    }
    Ok(())
}

fn file_size_and_block(sources: &FileSourceTable, source_index: usize) -> (u64, u64) {
    let entry = sources.entry(source_index);
    let block = entry.sections.first().map(|s| s.block).unwrap_or(0);
    (block, entry.size())
}

/// Writes a directory record whose system-use suffix (if any) has already
/// been sized into `record.header.len`, placing `suffix` where
/// [`DirectoryRecord::write`] would otherwise leave zero padding.
fn write_record_with_suffix<W: Write>(
    out: &mut W,
    record: DirectoryRecord,
    suffix: &[u8],
) -> Result<(), WriterError> {
    out.write_all(record.header.to_bytes())?;
    out.write_all(record.name.bytes())?;
    let mut written = size_of::<crate::directory::DirectoryRecordHeader>() + record.name.len();
    if !suffix.is_empty() {
        out.write_all(suffix)?;
        written += suffix.len();
    }
    if written < record.header.len as usize {
        out.write_all(&vec![0u8; record.header.len as usize - written])?;
    }
    Ok(())
}

/// Serializes one arena directory's "." and ".." records plus one record
/// per child, per ECMA-119 §6.8, followed by whatever continuation-area
/// blocks the children's extension suffixes reserved (§4.J). Neither "."
/// nor ".." carries an extension suffix — they reference directories, not
/// the nodes an extension attaches metadata to.
pub(crate) fn write_one_directory<W: WriteSeek>(
    out: &mut W,
    arena: &[ArenaDir],
    idx: usize,
    sources: &FileSourceTable,
    extensions: &ExtensionChain,
) -> Result<(), WriterError> {
    let dir = &arena[idx];
    let parent = &arena[dir.parent];

    let dot = DirectoryRecord::new(
        IsoStringFile::from_bytes(&[0u8]),
        DirectoryRef {
            offset: dir.block,
            size: dir.main_blocks * BLOCK_SIZE as u64,
        },
        FileFlags::DIRECTORY,
    );
    let dotdot = DirectoryRecord::new(
        IsoStringFile::from_bytes(&[1u8]),
        DirectoryRef {
            offset: parent.block,
            size: parent.main_blocks * BLOCK_SIZE as u64,
        },
        FileFlags::DIRECTORY,
    );
    dot.write(out)?;
    dotdot.write(out)?;
    let mut used_in_block = dot.header.len as usize + dotdot.header.len as usize;

    for (name, child_ref, node_id) in &dir.children {
        let (block, size, flags) = match child_ref {
            ChildRef::Dir(child_idx) => {
                let child = &arena[*child_idx];
                (
                    child.block,
                    child.main_blocks * BLOCK_SIZE as u64,
                    FileFlags::DIRECTORY,
                )
            }
            ChildRef::File(source_index) => {
                let (block, size) = file_size_and_block(sources, *source_index);
                (block, size, FileFlags::empty())
            }
        };
        let mut record =
            DirectoryRecord::new(IsoStringFile::from_bytes(name.as_bytes()), DirectoryRef { offset: block, size }, flags);
        let base_len = record.header.len as usize;

        let mut suffix = Vec::new();
        if let Some(id) = node_id {
            let mut ignored = 0u64;
            if suffix_len_for(extensions, *id, base_len, &mut ignored) > 0 {
                if let Err(err) = extensions.emit_suffix(*id, &mut suffix) {
                    log::warn!("dropping directory entry extension suffix: {err}");
                    suffix.clear();
                }
            }
        }

        let record_len = if suffix.is_empty() {
            base_len
        } else {
            let total = (base_len + suffix.len() + 1) & !1;
            record.header.len = total as u8;
            total
        };
        if used_in_block + record_len > BLOCK_SIZE {
            out.write_all(&vec![0u8; BLOCK_SIZE - used_in_block])?;
            used_in_block = 0;
        }
        write_record_with_suffix(out, record, &suffix)?;
        used_in_block += record_len;
    }
    if used_in_block < BLOCK_SIZE {
        out.write_all(&vec![0u8; BLOCK_SIZE - used_in_block])?;
    }
    if dir.continuation_blocks > 0 {
        out.write_all(&vec![0u8; (dir.continuation_blocks * BLOCK_SIZE as u64) as usize])?;
    }
    Ok(())
}

/// Copies every file-source-table entry's bytes to its assigned
/// section(s), splitting across extents per §4.C for files larger than
/// `MAX_EXTENT_SIZE`.
pub(crate) fn write_all_file_data<W: WriteSeek>(
    out: &mut W,
    sources: &FileSourceTable,
) -> Result<(), WriterError> {
    for entry in sources.iter() {
        entry.stream.open()?;
        let mut cursor = 0usize;
        for section in &entry.sections {
            out.seek(SeekFrom::Start(section.block * BLOCK_SIZE as u64))?;
            let mut remaining = section.byte_length;
            let mut buf = [0u8; 8192];
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                let count = entry.stream.read(&mut cursor, &mut buf[..want])?;
                if count == 0 {
                    break;
                }
                out.write_all(&buf[..count])?;
                remaining -= count as u64;
            }
            let padded = isoforge_io::align_to_block(section.byte_length) - section.byte_length;
            if padded > 0 {
                out.write_all(&vec![0u8; padded as usize])?;
            }
        }
    }
    Ok(())
}

/// What [`emit_image`] produced: the total image size and the root
/// directory's final extent, which callers that patch in extra structures
/// after the fact (El Torito's boot catalog) need to locate it again.
pub struct EmitResult {
    pub total_blocks: u64,
    pub root: DirectoryRef,
}

/// Writes the planned path tables, directory records, and file data to
/// `out`, which must already be positioned anywhere — every write in this
/// function seeks to an absolute block first. Shared by [`emit_image`]
/// (random-access, one call per image) and the streaming producer in
/// `pipeline` (sequential, over a ring-buffer-backed sink that only accepts
/// forward seeks).
pub(crate) fn write_body<W: WriteSeek>(
    out: &mut W,
    planned: &Planned,
    sources: &FileSourceTable,
    extensions: &ExtensionChain,
) -> Result<(), WriterError> {
    out.seek(SeekFrom::Start(
        planned.layout.l_path_table_block * BLOCK_SIZE as u64,
    ))?;
    write_path_table(out, &planned.path_entries, EndianType::LittleEndian)?;
    out.seek(SeekFrom::Start(
        planned.layout.m_path_table_block * BLOCK_SIZE as u64,
    ))?;
    write_path_table(out, &planned.path_entries, EndianType::BigEndian)?;

    for idx in 0..planned.arena.len() {
        out.seek(SeekFrom::Start(planned.arena[idx].block * BLOCK_SIZE as u64))?;
        write_one_directory(out, &planned.arena, idx, sources, extensions)?;
    }

    write_all_file_data(out, sources)?;

    // Padding writer: the image's declared total size may extend past the
    // last block any content writer above actually touched (§8's 32-block
    // floor, or a caller-requested size larger than the content needs).
    // Seeking there fills the gap with zeros for a forward-only sink and is
    // a no-op for a destination already sized that large.
    out.seek(SeekFrom::Start(planned.layout.total_blocks * BLOCK_SIZE as u64))?;
    Ok(())
}

/// Plans layout and writes the full image body (volume descriptors, path
/// tables, directory records, file data) to `out`. `start_block` is the
/// first block available after the fixed 16-block system area and the
/// volume descriptor set; the caller (`lib.rs`) has already reserved those.
/// `base_block` is the session's own start LBA (`0` unless this is a
/// multisession append), which anchors the §8 32-block size floor.
pub fn emit_image<W: WriteSeek>(
    out: &mut W,
    tree: &ProjectionTree,
    sources: &mut FileSourceTable,
    descriptors: &mut VolumeDescriptorList,
    descriptor_block: u64,
    start_block: u64,
    base_block: u64,
    sort_files_by_weight: bool,
    appendable: bool,
    extensions: &ExtensionChain,
) -> Result<EmitResult, WriterError> {
    let planned = plan(
        tree,
        sources,
        start_block,
        base_block,
        sort_files_by_weight,
        appendable,
        extensions,
    )?;
    planned.patch_primary(descriptors.primary_mut(), planned.layout.total_blocks);

    out.seek(SeekFrom::Start(descriptor_block * BLOCK_SIZE as u64))?;
    descriptors.write(out)?;

    write_body(out, &planned, sources, extensions)?;

    Ok(EmitResult {
        total_blocks: planned.layout.total_blocks,
        root: planned.root(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{File, FileData, FileInput};
    use crate::projection::{ProjectionBuilder, ProjectionOptions};

    #[test]
    fn build_arena_places_root_first_and_nests_subdirectories() {
        let mut input = FileInput::empty();
        input.append(File::directory("docs"));
        input.append(File::new("docs/a.txt", FileData::Data(vec![1])));
        let mut sources = FileSourceTable::new();
        let tree = ProjectionBuilder::new(&input, ProjectionOptions::default())
            .build(&mut sources)
            .unwrap();
        let arena = build_arena(&tree);
        assert_eq!(arena[0].name, "");
        assert_eq!(arena.len(), 2);
        assert!(arena[1].name.starts_with("DOCS"));
    }

    #[test]
    fn plan_advances_block_counter_past_path_tables_and_directories() {
        let mut input = FileInput::empty();
        input.append(File::new("a.txt", FileData::Data(vec![1, 2, 3])));
        let mut sources = FileSourceTable::new();
        let tree = ProjectionBuilder::new(&input, ProjectionOptions::default())
            .build(&mut sources)
            .unwrap();
        let planned = plan(&tree, &mut sources, 20, 0, false, false, &ExtensionChain::new()).unwrap();
        assert!(planned.layout.total_blocks > 20);
        assert_eq!(planned.path_entries.len(), 1);
        assert_eq!(planned.path_entries[0].name, "");
    }

    #[test]
    fn plan_pads_an_empty_image_up_to_the_32_block_floor() {
        let input = FileInput::empty();
        let mut sources = FileSourceTable::new();
        let tree = ProjectionBuilder::new(&input, ProjectionOptions::default())
            .build(&mut sources)
            .unwrap();
        let planned = plan(&tree, &mut sources, 0, 0, false, false, &ExtensionChain::new()).unwrap();
        assert_eq!(planned.layout.total_blocks, MIN_IMAGE_BLOCKS);
    }

    #[test]
    fn plan_floors_relative_to_a_multisession_base_block() {
        let input = FileInput::empty();
        let mut sources = FileSourceTable::new();
        let tree = ProjectionBuilder::new(&input, ProjectionOptions::default())
            .build(&mut sources)
            .unwrap();
        let planned = plan(&tree, &mut sources, 100, 100, false, false, &ExtensionChain::new()).unwrap();
        assert_eq!(planned.layout.total_blocks, 100 + MIN_IMAGE_BLOCKS);
    }

    #[test]
    fn emit_image_writes_into_a_memory_backed_cursor() {
        let mut input = FileInput::empty();
        input.append(File::new("a.txt", FileData::Data(vec![1, 2, 3, 4])));
        let mut sources = FileSourceTable::new();
        let tree = ProjectionBuilder::new(&input, ProjectionOptions::default())
            .build(&mut sources)
            .unwrap();
        let mut descriptors = VolumeDescriptorList::empty();
        descriptors.push(crate::volume::VolumeDescriptor::Primary(
            crate::volume::PrimaryVolumeDescriptor::new("TEST", 0),
        ));
        let mut cursor = std::io::Cursor::new(vec![0u8; 1 << 20]);
        let result = emit_image(
            &mut cursor,
            &tree,
            &mut sources,
            &mut descriptors,
            16,
            20,
            0,
            false,
            false,
            &ExtensionChain::new(),
        )
        .unwrap();
        assert!(result.total_blocks > 20);
        assert!(result.root.offset >= 20);
        assert!(result.root.size > 0);
    }

    struct TagSuffix;

    impl crate::extension::DirectoryRecordExtension for TagSuffix {
        fn name(&self) -> &str {
            "tag"
        }

        fn suffix_len(&self, _node: NodeId) -> Result<usize, crate::extension::ExtensionError> {
            Ok(4)
        }

        fn emit_suffix(
            &self,
            _node: NodeId,
            out: &mut Vec<u8>,
        ) -> Result<(), crate::extension::ExtensionError> {
            out.extend_from_slice(b"TAG1");
            Ok(())
        }
    }

    #[test]
    fn emit_image_writes_extension_suffix_bytes_for_tree_backed_entries() {
        use crate::stream::{MemStream, StreamIdentity};
        use crate::tree::LogicalTree;

        let mut logical = LogicalTree::create_root();
        let root = logical.root();
        let stream: std::sync::Arc<dyn crate::stream::ContentStream> =
            std::sync::Arc::new(MemStream::new(vec![1, 2, 3], StreamIdentity::synthetic(9)));
        logical.create_file(root, "a.txt", stream).unwrap();

        let input = FileInput::from_tree(&logical);
        let mut sources = FileSourceTable::new();
        let tree = ProjectionBuilder::new(&input, ProjectionOptions::default())
            .build(&mut sources)
            .unwrap();
        let mut chain = ExtensionChain::new();
        chain.push(Box::new(TagSuffix));

        let mut descriptors = VolumeDescriptorList::empty();
        descriptors.push(crate::volume::VolumeDescriptor::Primary(
            crate::volume::PrimaryVolumeDescriptor::new("TEST", 0),
        ));
        let mut cursor = std::io::Cursor::new(vec![0u8; 1 << 20]);
        let result = emit_image(
            &mut cursor,
            &tree,
            &mut sources,
            &mut descriptors,
            16,
            20,
            0,
            false,
            false,
            &chain,
        )
        .unwrap();

        let bytes = cursor.into_inner();
        let root_start = (result.root.offset * BLOCK_SIZE as u64) as usize;
        let root_end = root_start + result.root.size as usize;
        let haystack = &bytes[root_start..root_end];
        assert!(
            haystack.windows(4).any(|w| w == b"TAG1"),
            "expected the extension's suffix bytes somewhere in the root directory's records"
        );
    }
}
