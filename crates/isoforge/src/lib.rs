//! isoforge
//!
//! An ISO 9660 / Joliet / ISO 9660:1999 / El Torito image-emission engine.
//! Terminology follows ECMA-119 and the El Torito boot specification.

#[cfg(feature = "el-torito")]
pub mod boot;
#[cfg(feature = "el-torito")]
pub use boot::*;

pub use directory::*;
pub use extension::{DirectoryRecordExtension, ExtensionChain, ExtensionError};
pub use file::*;
pub use filter::{CompressionFilter, ExternalCommandFilter, FilterWrongInput, ReductionPolicy};
pub use options::*;
pub use path::*;
pub use pipeline::{emit, EmitHandle, EmitOutcome};
pub use projection::{ProjectionBuilder, ProjectionError, ProjectionKind, ProjectionOptions};
pub use ring::{RingBuffer, RingState};
pub use session::{OverwriteBuffer, OverwritePatch, SessionOptions};
pub use source::{FileSourceEntry, FileSourceTable};
pub use stream::{ContentStream, FsStream, MemStream, SizeDrift, StreamIdentity};
pub use tree::{HiddenMask, LogicalTree, NodeAttributes, NodeId, NodeKind, ReplacePolicy, TreeError};
pub use writer::WriterError;
// We expose these types because they are used in the public API, but they
// are also just std::io types (or isoforge-io's equivalents in no-std mode).
pub use isoforge_io::{Error, Read, Seek, SeekFrom, Write};

use std::collections::BTreeMap;
pub use types::*;
pub use volume::*;

mod directory;
mod extension;
mod file;
mod filter;
mod options;
mod path;
mod pipeline;
mod projection;
mod ring;
mod session;
mod source;
mod stream;
mod tree;
mod types;
mod volume;
mod writer;

/// Errors that can occur when working with an ISO image, per §7's taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum IsoImageError {
    #[cfg(feature = "extra-checks")]
    /// The image is too small, check [`FormatOption::image_len()`] for the minimum size
    #[error("The image is too small, expected at least {0}b, got {1}b")]
    ImageTooSmall(u64, u64),

    /// An IO error occurred.
    #[error(transparent)]
    IoError(#[from] isoforge_io::Error),

    #[error(transparent)]
    Projection(#[from] projection::ProjectionError),

    #[error(transparent)]
    Writer(#[from] writer::WriterError),

    /// A boot entry referenced a path that was never staged into the image.
    #[error("boot entry path {0:?} was not found among the staged files")]
    BootImageNotFound(String),
}

/// An ISO image
///
/// This is the main struct for working with ISO images.
///
/// # Example
/// To create a new ISO image, you can use the [`Self::format_file`] method. \
/// This example creates a hybrid bootable image with a BIOS boot entry and a UEFI boot entry:
/// ```
/// use isoforge::{IsoImage, FormatOption, FileInput, FileInterchange, BootOptions, BootEntryOptions, EmulationType, PlatformId, BootSectionOptions};
/// use std::path::PathBuf;
///
/// let files = PathBuf::from("path/to/iso_root");
/// # // Now we need to actually create a temporary directory
/// # let files = tempfile::tempdir()?.into_path();
/// # let mut tmpfile = std::fs::File::create(files.join("boot.img"))?;
/// # use std::io::Write;
/// # writeln!(tmpfile, "Hello, world!")?;
/// # drop(tmpfile);
/// # let mut tmpfile = std::fs::File::create(files.join("uefi-boot.img"))?;
/// # writeln!(tmpfile, "Hello, world!")?;
/// # drop(tmpfile);
/// let options = FormatOption::default()
/// .with_files(FileInput::from_fs(&files)?)
/// .with_level(FileInterchange::NonConformant)
/// .with_boot_options(BootOptions {
///     write_boot_catalogue: true,
///     default: BootEntryOptions {
///         boot_image_path: "boot.img".to_string(),
///         load_size: 4,
///         emulation: EmulationType::NoEmulation,
///         boot_info_table: true,
///         grub2_boot_info: false,
///     },
///     entries: vec![(
///         BootSectionOptions {
///             platform_id: PlatformId::UEFI,
///         },
///         BootEntryOptions {
///             boot_image_path: "uefi-boot.img".to_string(),
///             load_size: 0, // This means the size will be calculated
///             emulation: EmulationType::NoEmulation,
///             boot_info_table: false,
///             grub2_boot_info: false,
///         },
///     )],
/// });
/// let output_file = PathBuf::from("my_image.iso");
/// # let output_file = files.join("my_image.iso");
/// let file = IsoImage::format_file(output_file, options)?;
/// # Ok::<(), isoforge::IsoImageError>(())
/// ````
#[derive(Debug)]
pub struct IsoImage<'a, T: Read + Write + Seek> {
    data: &'a mut T,

    volume_descriptors: VolumeDescriptorList,
    root_directory: DirectoryRef,
    path_table: PathTableRef,
}

impl<'a> IsoImage<'a, std::fs::File> {
    /// Formats a new ISO image,
    ///
    /// This creates a new file, which may be too large for some cases,
    /// but it will be truncated to the correct size when the image is written.
    /// This may only be an issue when low on disk space or using an in-memory filesystem.
    /// Due to how many operating systems work with files, the pages should be mapped-on-demand,
    /// and there shouldn't be a lot of performance penalty.
    pub fn format_file<P>(path: P, options: FormatOption) -> Result<std::fs::File, IsoImageError>
    where
        P: AsRef<std::path::Path>,
    {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .unwrap();
        let (min, max) = options.image_len();
        log::trace!("Calculate minimum and maximum size of image: {min}b to {max}b");
        file.set_len(max).unwrap();
        IsoImage::format_new(&mut file, options)?;
        let written = file.stream_position()?;
        log::debug!("Written {written}b to image, trimming...");
        file.set_len(written)?;
        file.flush()?;
        Ok(file)
    }
}

impl<'a, T: Read + Write + Seek> IsoImage<'a, T> {
    /// Formats a new ISO image,
    /// for a more convenient API, see [`Self::format_file`] for [`std::fs::File`]
    /// Otherwise, resize the image using the minimum / maximum from [`FormatOption::image_len`].
    pub fn format_new(data: &'a mut T, mut ops: FormatOption) -> Result<Option<session::OverwriteBuffer>, IsoImageError> {
        #[cfg(feature = "extra-checks")]
        if ops.strictness >= Strictness::Default {
            let size_bytes = data.seek(SeekFrom::End(0))?;
            let (min_size, _max_size) = ops.image_len();
            if size_bytes < min_size {
                return Err(IsoImageError::ImageTooSmall(min_size, size_bytes));
            }

            log::trace!(
                "Started formatting ISO image with {} sectors ({} bytes)",
                size_bytes / 2048,
                size_bytes
            );
        }

        let base_block = ops.session.start_lba;

        let mut volume_descriptors = VolumeDescriptorList::empty();
        volume_descriptors.push(VolumeDescriptor::Primary(PrimaryVolumeDescriptor::new(
            ops.volume_name.as_str(),
            0, // patched once the layout planner has run
        )));

        if ops.joliet {
            volume_descriptors.push(VolumeDescriptor::Supplementary(
                SupplementaryVolumeDescriptor::new_joliet(ops.volume_name.as_str(), 0),
            ));
        }

        // Stage the El Torito boot catalog as a regular file (if requested)
        // and reserve the boot record descriptor slot, before the projection
        // tree is built, so the catalog participates in layout like any
        // other file.
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

        let result = writer::emit_image(
            data,
            &tree,
            &mut sources,
            &mut volume_descriptors,
            descriptor_block,
            start_block,
            base_block,
            ops.sort_files_by_weight,
            ops.session.appendable,
            &ops.extensions,
        )?;
        let mut total_blocks = result.total_blocks;

        #[cfg(feature = "el-torito")]
        if let Some(boot_ops) = &ops.boot {
            total_blocks = Self::patch_boot_catalog(
                data,
                boot_ops,
                &sources,
                &source_paths,
                &mut volume_descriptors,
                total_blocks,
            )?;
        }

        if let Some(system_area) = &ops.system_area {
            assert!(
                system_area.len() <= 16 * 2048,
                "system area payload must fit in the 16-block system area"
            );
            data.seek(SeekFrom::Start(base_block * 2048))?;
            data.write_all(system_area)?;
        }

        volume_descriptors
            .primary_mut()
            .volume_space_size
            .write(total_blocks as u32);

        // A multisession image's system area and volume descriptor set are
        // the bytes a caller overlays onto the tail of the prior session
        // (§4.I); capture a dry-run copy before writing them for real.
        let overwrite_buffer = if base_block > 0 {
            Some(pipeline::capture_overwrite_buffer(
                ops.session.overwrite_buffer_size,
                ops.system_area.as_deref(),
                &volume_descriptors,
            )?)
        } else {
            None
        };

        data.seek(SeekFrom::Start((base_block + 16) * 2048))?;
        volume_descriptors.write(data)?;

        let size_bytes = total_blocks * 2048;
        data.seek(SeekFrom::Start(size_bytes))?;
        Ok(overwrite_buffer)
    }

    /// Resolves every boot entry's real on-disc extent (known only after
    /// [`writer::emit_image`] has assigned blocks), writes the boot info
    /// table / GRUB2 stub patches into the boot image bytes, serializes the
    /// catalog, and points the boot record descriptor at it. Returns the
    /// (possibly grown, if the catalog was appended past the image rather
    /// than staged as a visible file) total block count.
    #[cfg(feature = "el-torito")]
    fn patch_boot_catalog(
        data: &mut T,
        boot_ops: &BootOptions,
        sources: &FileSourceTable,
        source_paths: &BTreeMap<String, usize>,
        volume_descriptors: &mut VolumeDescriptorList,
        total_blocks: u64,
    ) -> Result<u64, IsoImageError> {
        let mut catalog = BootCatalog::default();

        for (section, mut entry) in boot_ops.sections() {
            let source_index = *source_paths
                .get(&entry.boot_image_path)
                .ok_or_else(|| IsoImageError::BootImageNotFound(entry.boot_image_path.clone()))?;
            let source = sources.entry(source_index);
            let boot_image_lba = source
                .sections
                .first()
                .map(|s| s.block)
                .unwrap_or(0) as u32;
            let file_len = source.size() as u32;

            if entry.load_size == 0 {
                entry.load_size = ((file_len as u64 + 511) / 512) as u16;
            }
            let boot_entry =
                BootSectionEntry::new(entry.emulation, 0, entry.load_size, boot_image_lba);

            if let Some(section) = section {
                catalog.add_section(section.platform_id, vec![boot_entry]);
            } else {
                catalog.set_default_entry(boot_entry);
            }

            if entry.boot_info_table {
                let mut checksum = 0u32;
                let mut buffer = [0u8; 4];
                data.seek(SeekFrom::Start(boot_image_lba as u64 * 2048 + 64))?;
                for _ in (64..file_len).step_by(4) {
                    data.read_exact(&mut buffer)?;
                    checksum = checksum.wrapping_add(u32::from_le_bytes(buffer));
                }
                let table = BootInfoTable {
                    iso_start: U32::new(16),
                    file_lba: U32::new(boot_image_lba),
                    file_len: U32::new(file_len),
                    checksum: U32::new(checksum),
                };
                const TABLE_OFFSET: u64 = 8;
                data.seek(SeekFrom::Start(
                    boot_image_lba as u64 * 2048 + TABLE_OFFSET,
                ))?;
                data.write_all(bytemuck::bytes_of(&table))?;
            }

            if entry.grub2_boot_info {
                // GRUB2's boot info wants the start of the image file in
                // 512-byte blocks plus 5, written at byte offset 2548.
                let value = boot_image_lba * 4 + 5;
                data.seek(SeekFrom::Start(boot_image_lba as u64 * 2048 + 2548))?;
                data.write_all(&value.to_le_bytes())?;
            }
        }

        let (catalog_block, grown_total) = if boot_ops.write_boot_catalogue {
            let source_index = *source_paths
                .get("boot.catalog")
                .expect("create_descriptor staged boot.catalog when write_boot_catalogue is set");
            let source = sources.entry(source_index);
            let block = source.sections.first().map(|s| s.block).unwrap_or(0);
            assert!(source.size() as usize >= catalog.size());
            data.seek(SeekFrom::Start(block * 2048))?;
            catalog.write(data)?;
            (block as u32, total_blocks)
        } else {
            let block = total_blocks;
            data.seek(SeekFrom::Start(block * 2048))?;
            catalog.write(data)?;
            let catalog_blocks = isoforge_io::blocks_for(catalog.size() as u64);
            (block as u32, block + catalog_blocks)
        };

        volume_descriptors
            .boot_record_mut()
            .unwrap()
            .catalog_ptr
            .set(catalog_block);

        Ok(grown_total)
    }

    #[deprecated(since = "0.0.1", note = "Use `parse` instead")]
    pub fn new(data: &'a mut T) -> Result<Self, Error> {
        Self::parse(data)
    }

    /// Parses an ISO image from the given reader
    /// Currently this is not fully supported, and only provides basic information
    pub fn parse(data: &'a mut T) -> Result<Self, Error> {
        data.seek(SeekFrom::Start(16 * 2048))?;
        let volume_descriptors = VolumeDescriptorList::parse(data)?;

        let pvd = volume_descriptors.primary();
        #[cfg(feature = "el-torito")]
        if let Some(boot) = volume_descriptors.boot_record() {
            data.seek(SeekFrom::Start(boot.catalog_ptr.get() as u64 * 2048))?;
            let catalog = BootCatalog::parse(data)?;
            log::trace!("Boot catalog: {:?}", catalog);
            // At the moment we don't support anything further with a boot catalog.
        }

        let root_entry = pvd.dir_record;
        let root_directory = DirectoryRef {
            offset: root_entry.header.extent.read() as u64,
            size: root_entry.header.data_len.read() as u64,
        };

        let path_table = PathTableRef {
            lpath_table_offset: pvd.type_l_path_table.get() as u64,
            mpath_table_offset: pvd.type_m_path_table.get() as u64,
            size: pvd.path_table_size.read() as u64,
        };

        Ok(Self {
            data,

            volume_descriptors,
            root_directory,
            path_table,
        })
    }

    pub fn root_directory(&mut self) -> IsoDir<T> {
        IsoDir {
            reader: &mut self.data,
            directory: self.root_directory,
        }
    }

    pub fn path_table(&mut self) -> IsoPathTable<T> {
        IsoPathTable {
            reader: &mut self.data,
            path_table: self.path_table,
        }
    }
}

/// Trait for internal methods of the `IsoImage` struct.
///
/// This trait provides a way to access some of the internal structures of the `IsoImage` struct,
/// and not only the public API (files, boot entries, etc.).
pub trait VolumeInternals {
    /// Returns a reference to the volume descriptors.
    fn get_volume_descriptors(&self) -> &[VolumeDescriptor];
}

impl<'a, T: Read + Write + Seek> VolumeInternals for IsoImage<'a, T> {
    fn get_volume_descriptors(&self) -> &[VolumeDescriptor] {
        self.volume_descriptors.descriptors.as_slice()
    }
}
