//! The streaming producer/consumer pipeline (component G).
//!
//! [`emit`] does every tree-building, projection, and layout computation
//! synchronously on the caller's thread — once it returns an [`EmitHandle`],
//! the logical tree is frozen and a dedicated producer thread is already
//! running, feeding a bounded [`RingBuffer`] of whole 2048-byte blocks. The
//! handle is the pull side: `Read::read` drains whatever the producer has
//! queued, returning `Ok(0)` once the image is fully drained, and dropping
//! the handle before that point cancels the producer so it can unwind
//! instead of blocking forever on a full buffer nobody is reading.
//!
//! The one property this needs from [`crate::writer::write_body`] that a
//! genuinely random-access destination doesn't is that every seek it issues
//! moves forward: [`RingSink`] turns a seek past the current position into
//! zero-padding written through the same path, and rejects anything that
//! would move backward.

use std::collections::BTreeMap;
use std::io::{self, Read as _, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use isoforge_io::BLOCK_SIZE;

#[cfg(feature = "el-torito")]
use crate::boot::{self, BootCatalog, BootSectionEntry};
use crate::options::FormatOption;
use crate::projection::ProjectionBuilder;
use crate::ring::{RingBuffer, RingState};
use crate::session::OverwriteBuffer;
use crate::source::FileSourceTable;
use crate::stream::{ContentStream, MemStream};
use crate::volume::{PrimaryVolumeDescriptor, SupplementaryVolumeDescriptor, VolumeDescriptor, VolumeDescriptorList};
use crate::writer;
use crate::IsoImageError;

/// What the producer thread returns once it has pushed every block.
pub struct EmitOutcome {
    pub total_blocks: u64,
    /// Populated iff `ops.session.start_lba > 0`: a dry-run copy of the
    /// system area and volume descriptor set the caller can overlay onto
    /// the start of the prior session (§4.I).
    pub overwrite_buffer: Option<OverwriteBuffer>,
}

/// A forward-only `Write + Seek` adapter over a [`RingBuffer`]. Bytes
/// accumulate in `pending` until a whole block is available, then that
/// block is pushed; a seek ahead of the current position is realized by
/// writing zeros through the same path, so the block immediately before a
/// gap and the gap itself reach the consumer in the same order they would
/// on a real seekable destination.
struct RingSink<'a> {
    ring: &'a RingBuffer,
    base_offset: u64,
    written: u64,
    pending: Vec<u8>,
    cancelled: bool,
}

impl<'a> RingSink<'a> {
    fn new(ring: &'a RingBuffer, base_offset: u64) -> Self {
        Self {
            ring,
            base_offset,
            written: 0,
            pending: Vec::with_capacity(BLOCK_SIZE),
            cancelled: false,
        }
    }

    fn flush_blocks(&mut self) -> io::Result<()> {
        while self.pending.len() >= BLOCK_SIZE {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&self.pending[..BLOCK_SIZE]);
            self.pending.drain(..BLOCK_SIZE);
            if !self.ring.push(block) {
                self.cancelled = true;
                return Err(io::Error::new(io::ErrorKind::Interrupted, "ring consumer cancelled"));
            }
            self.written += BLOCK_SIZE as u64;
        }
        Ok(())
    }

    /// Pads and flushes whatever remains of the final partial block. The
    /// total image size is always block-aligned by construction, so
    /// `pending` is normally already empty by the time this runs.
    fn finish(mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let pad = BLOCK_SIZE - self.pending.len();
            self.pending.extend(std::iter::repeat(0u8).take(pad));
        }
        self.flush_blocks()
    }
}

impl Write for RingSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancelled {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "ring consumer cancelled"));
        }
        self.pending.extend_from_slice(buf);
        self.flush_blocks()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for RingSink<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target_abs = match pos {
            SeekFrom::Start(t) => t,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "a streaming sink only supports seeking from the start",
                ))
            }
        };
        let target = target_abs.checked_sub(self.base_offset).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                "seek target precedes this session's start block",
            )
        })?;
        let current = self.written + self.pending.len() as u64;
        if target < current {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "a streaming sink cannot seek backward",
            ));
        }
        let gap = (target - current) as usize;
        if gap > 0 {
            let zeros = vec![0u8; gap];
            self.write_all(&zeros)?;
        }
        Ok(target_abs)
    }
}

fn read_stream_fully(stream: &dyn ContentStream) -> io::Result<Vec<u8>> {
    stream.open()?;
    let mut cursor = 0usize;
    let mut buf = [0u8; 8192];
    let mut out = Vec::with_capacity(stream.size() as usize);
    loop {
        let count = stream.read(&mut cursor, &mut buf)?;
        if count == 0 {
            break;
        }
        out.extend_from_slice(&buf[..count]);
    }
    Ok(out)
}

/// Builds the boot catalog and, for any entry requesting a boot-info-table
/// or GRUB2 stub patch, a patched copy of that entry's content bytes. The
/// streaming producer cannot seek backward into an already-emitted boot
/// image the way [`crate::IsoImage::format_new`]'s disk patch can, so the
/// patch is applied to the source bytes before they are ever handed to the
/// writer chain — the boot image's assigned LBA is already known, since
/// layout planning has already run by the time this is called.
#[cfg(feature = "el-torito")]
fn stage_boot_catalog(
    boot_ops: &crate::options::BootOptions,
    sources: &FileSourceTable,
    source_paths: &BTreeMap<String, usize>,
    total_blocks: u64,
) -> Result<(u32, u64, Vec<(usize, Vec<u8>)>, Vec<u8>), IsoImageError> {
    let mut catalog = BootCatalog::default();
    let mut patches = Vec::new();

    for (section, mut entry) in boot_ops.sections() {
        let source_index = *source_paths
            .get(&entry.boot_image_path)
            .ok_or_else(|| IsoImageError::BootImageNotFound(entry.boot_image_path.clone()))?;
        let source = sources.entry(source_index);
        let boot_image_lba = source.sections.first().map(|s| s.block).unwrap_or(0) as u32;
        let file_len = source.size() as u32;

        if entry.load_size == 0 {
            entry.load_size = ((file_len as u64 + 511) / 512) as u16;
        }
        let boot_entry = BootSectionEntry::new(entry.emulation, 0, entry.load_size, boot_image_lba);
        if let Some(section) = section {
            catalog.add_section(section.platform_id, vec![boot_entry]);
        } else {
            catalog.set_default_entry(boot_entry);
        }

        if entry.boot_info_table || entry.grub2_boot_info {
            let raw = read_stream_fully(source.stream.as_ref())?;
            let patched = boot::ElToritoWriter::patch_boot_image_bytes(
                raw,
                16,
                boot_image_lba,
                entry.boot_info_table,
                entry.grub2_boot_info,
            );
            patches.push((source_index, patched));
        }
    }

    let (catalog_block, grown_total, catalog_bytes) = if boot_ops.write_boot_catalogue {
        let source_index = *source_paths
            .get("boot.catalog")
            .expect("create_descriptor staged boot.catalog when write_boot_catalogue is set");
        let source = sources.entry(source_index);
        let block = source.sections.first().map(|s| s.block).unwrap_or(0) as u32;
        let mut bytes = Vec::new();
        catalog.write(&mut bytes)?;
        bytes.resize(source.size() as usize, 0);
        (block, total_blocks, bytes)
    } else {
        let block = total_blocks as u32;
        let mut bytes = Vec::new();
        catalog.write(&mut bytes)?;
        let catalog_blocks = isoforge_io::blocks_for(bytes.len() as u64);
        bytes.resize((catalog_blocks * BLOCK_SIZE as u64) as usize, 0);
        (block, total_blocks + catalog_blocks, bytes)
    };

    Ok((catalog_block, grown_total, patches, catalog_bytes))
}

/// Captures the system area and volume descriptor set into an overwrite
/// buffer, independently of the real emission that follows — the dry run
/// §4.I asks for. Shared by [`emit`] and [`crate::IsoImage::format_new`].
pub(crate) fn capture_overwrite_buffer(
    capacity: usize,
    system_area: Option<&[u8]>,
    descriptors: &VolumeDescriptorList,
) -> io::Result<OverwriteBuffer> {
    let mut buffer = OverwriteBuffer::new(capacity);
    let mut preamble = io::Cursor::new(Vec::new());
    if let Some(payload) = system_area {
        preamble.write_all(payload)?;
    }
    preamble.seek(SeekFrom::Start(16 * BLOCK_SIZE as u64))?;
    descriptors.write(&mut preamble)?;
    buffer.capture(0, preamble.get_ref());
    Ok(buffer)
}

/// Builds and begins emitting an image without blocking on a destination:
/// tree building, projection, and layout planning all happen here on the
/// caller's thread (per §5, "frozen after producer spawned"); the returned
/// handle owns a producer thread that streams the already-planned image
/// body through a ring buffer sized by `ops.fifo_size`.
pub fn emit(mut ops: FormatOption) -> Result<EmitHandle, IsoImageError> {
    let fifo_blocks = ops.fifo_size.max(32);
    let base_block = ops.session.start_lba;
    let base_offset = base_block * BLOCK_SIZE as u64;

    let mut volume_descriptors = VolumeDescriptorList::empty();
    volume_descriptors.push(VolumeDescriptor::Primary(PrimaryVolumeDescriptor::new(
        ops.volume_name.as_str(),
        0,
    )));
    if ops.joliet {
        volume_descriptors.push(VolumeDescriptor::Supplementary(
            SupplementaryVolumeDescriptor::new_joliet(ops.volume_name.as_str(), 0),
        ));
    }
    #[cfg(feature = "el-torito")]
    if let Some(boot_ops) = &ops.boot {
        let boot_record = boot::ElToritoWriter::create_descriptor(boot_ops, &mut ops.files);
        volume_descriptors.push(VolumeDescriptor::BootRecord(boot_record));
    }

    let builder = ProjectionBuilder::new(&ops.files, ops.projection_options());
    let mut sources = FileSourceTable::new();
    let (tree, source_paths) = builder.build_with_source_paths(&mut sources)?;
    builder.check_path_lengths(&tree)?;

    let descriptor_block = base_block + 16;
    let descriptor_blocks = isoforge_io::blocks_for(volume_descriptors.size_required() as u64);
    let start_block = descriptor_block + descriptor_blocks;

    let extensions = ops.extensions.clone();
    let planned = writer::plan(
        &tree,
        &mut sources,
        start_block,
        base_block,
        ops.sort_files_by_weight,
        ops.session.appendable,
        &extensions,
    )?;
    let mut total_blocks = planned.layout.total_blocks;

    #[cfg(feature = "el-torito")]
    let mut boot_write: Option<(u32, Vec<u8>)> = None;
    #[cfg(feature = "el-torito")]
    if let Some(boot_ops) = &ops.boot {
        let (catalog_block, grown, patches, catalog_bytes) =
            stage_boot_catalog(boot_ops, &sources, &source_paths, total_blocks)?;
        for (index, bytes) in patches {
            let identity = sources.entry(index).stream.identity();
            sources.entry_mut(index).stream = Arc::new(MemStream::new(bytes, identity));
        }
        total_blocks = grown;
        volume_descriptors.boot_record_mut().unwrap().catalog_ptr.set(catalog_block);
        boot_write = Some((catalog_block, catalog_bytes));
    }

    planned.patch_primary(volume_descriptors.primary_mut(), total_blocks);

    let overwrite_buffer = if base_block > 0 {
        Some(capture_overwrite_buffer(
            ops.session.overwrite_buffer_size,
            ops.system_area.as_deref(),
            &volume_descriptors,
        )?)
    } else {
        None
    };

    let ring = Arc::new(RingBuffer::new(fifo_blocks));
    let producer_ring = ring.clone();
    let size_bytes = total_blocks * BLOCK_SIZE as u64;
    let system_area = ops.system_area.clone();

    let producer = thread::spawn(move || -> Result<EmitOutcome, IsoImageError> {
        let result = (|| -> Result<(), IsoImageError> {
            let mut sink = RingSink::new(&producer_ring, base_offset);
            if let Some(payload) = &system_area {
                sink.write_all(payload)?;
            }
            sink.seek(SeekFrom::Start(descriptor_block * BLOCK_SIZE as u64))?;
            volume_descriptors.write(&mut sink)?;
            writer::write_body(&mut sink, &planned, &sources, &extensions)?;

            #[cfg(feature = "el-torito")]
            if let Some((catalog_block, catalog_bytes)) = boot_write {
                sink.seek(SeekFrom::Start(catalog_block as u64 * BLOCK_SIZE as u64))?;
                sink.write_all(&catalog_bytes)?;
            }

            sink.seek(SeekFrom::Start(total_blocks * BLOCK_SIZE as u64))?;
            sink.finish()?;
            Ok(())
        })();

        match &result {
            Ok(()) => producer_ring.finish_ok(),
            Err(_) => producer_ring.finish_err(),
        }
        result.map(|()| EmitOutcome {
            total_blocks,
            overwrite_buffer,
        })
    });

    Ok(EmitHandle {
        ring,
        handle: Some(producer),
        size_bytes,
        pop_buf: [0u8; BLOCK_SIZE],
        pop_len: 0,
        pop_pos: 0,
    })
}

/// The consumer side of a running emission: a pull-based [`Read`](io::Read)
/// over the blocks the producer thread has queued so far.
pub struct EmitHandle {
    ring: Arc<RingBuffer>,
    handle: Option<JoinHandle<Result<EmitOutcome, IsoImageError>>>,
    size_bytes: u64,
    pop_buf: [u8; BLOCK_SIZE],
    pop_len: usize,
    pop_pos: usize,
}

impl EmitHandle {
    /// The image's final size in bytes, known as soon as layout planning
    /// finished — before the first byte has necessarily reached the ring.
    pub fn size(&self) -> u64 {
        self.size_bytes
    }

    pub fn state(&self) -> RingState {
        self.ring.state()
    }

    /// Signals the producer to stop, unblocking it if it is waiting on a
    /// full ring. Idempotent.
    pub fn cancel(&self) {
        self.ring.cancel();
    }

    /// Joins the producer thread and returns its outcome. Panics if called
    /// twice; dropping the handle without calling this joins it anyway
    /// (cancelling first, to avoid waiting out a run no one is draining).
    pub fn join(&mut self) -> Result<EmitOutcome, IsoImageError> {
        let handle = self.handle.take().expect("EmitHandle already joined");
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(IsoImageError::IoError(io::Error::new(
                io::ErrorKind::Other,
                "the emission producer thread panicked",
            ))),
        }
    }
}

impl io::Read for EmitHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pop_pos >= self.pop_len {
            match self.ring.pop() {
                Some(block) => {
                    self.pop_buf = block;
                    self.pop_len = BLOCK_SIZE;
                    self.pop_pos = 0;
                }
                None => return Ok(0),
            }
        }
        let avail = self.pop_len - self.pop_pos;
        let count = avail.min(buf.len());
        buf[..count].copy_from_slice(&self.pop_buf[self.pop_pos..self.pop_pos + count]);
        self.pop_pos += count;
        Ok(count)
    }
}

impl Drop for EmitHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            let _ = self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{File, FileData, FileInput};

    #[test]
    fn emit_streams_a_small_image_to_completion() {
        let mut files = FileInput::empty();
        files.append(File::new("a.txt", FileData::Data(vec![1, 2, 3, 4])));
        let ops = FormatOption::default().with_files(files).with_fifo_size(32);

        let mut handle = emit(ops).unwrap();
        let expected_size = handle.size();
        let mut drained = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = handle.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            drained.extend_from_slice(&buf[..n]);
        }
        assert_eq!(drained.len() as u64, expected_size);
        let outcome = handle.join().unwrap();
        assert_eq!(outcome.total_blocks * BLOCK_SIZE as u64, expected_size);
    }

    #[test]
    fn cancelling_before_draining_unblocks_the_producer() {
        let mut files = FileInput::empty();
        for i in 0..64 {
            files.append(File::new(&format!("f{i}.txt"), FileData::Data(vec![0u8; 4096])));
        }
        let ops = FormatOption::default().with_files(files).with_fifo_size(32);
        let mut handle = emit(ops).unwrap();
        handle.cancel();
        // Dropping (or an explicit join) must return promptly rather than
        // hang waiting for a consumer that will never read again.
        let _ = handle.join();
    }
}
