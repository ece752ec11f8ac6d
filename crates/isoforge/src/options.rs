//! Caller-facing knobs for building an image, per §6: the projection-tree
//! toggles are threaded through to [`crate::projection::ProjectionOptions`]
//! at format time, while the rest ([`Strictness`], session/appendable
//! parameters, boot options) govern the writer chain directly.

use std::sync::Arc;

#[cfg(feature = "el-torito")]
use crate::boot::EmulationType;
use crate::extension::ExtensionChain;
use crate::session::SessionOptions;
use crate::{FileInput, FileInterchange, PlatformId};

// TODO: Make this a numerical value instead of an enum

/// The strictness of the image
#[repr(u8)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strictness {
    /// There are no checks to validate the image
    /// Only checks are done that would cause the format to fail
    /// In most cases this would panic on an assertion failure or unwrap
    /// This is not recommended, and in most cases [`Default`](Strictness::Default) should be fast enough
    Relaxed,

    /// There are no strict checks to validate the image,
    /// only checks that don't massively hurt the performance or would result in a broken image
    #[default]
    Default,

    /// There are strict checks to validate the image, without any false positives
    /// Use this if you want maximum compatibility with the ISO standard
    Strict,
}

// TODO: Support multiple volume sets

/// The options for formatting a new ISO image
#[derive(Debug, Clone)]
pub struct FormatOption {
    pub volume_name: String,
    pub level: FileInterchange,
    pub files: FileInput,
    /// The user can provide an image as the system area
    /// It should be less than 16 sectors (32KiB).
    /// It is written verbatim: no MBR, GPT, or other partition table is
    /// ever generated on its behalf (the system area is an opaque payload
    /// entirely owned by the caller, per §4.E).
    pub system_area: Option<Vec<u8>>,
    pub strictness: Strictness,
    /// Joliet and ISO 9660:1999 are independent sibling trees (component D);
    /// setting these builds the matching supplementary descriptor alongside
    /// the primary tree.
    pub joliet: bool,
    pub iso1999: bool,
    pub allow_deep_paths: bool,
    pub allow_longer_paths: bool,
    pub max_37_char_filenames: bool,
    pub no_force_dots: bool,
    pub allow_lowercase: bool,
    pub allow_full_ascii: bool,
    pub omit_version_numbers: bool,
    pub joliet_longer_paths: bool,
    /// Places files with a higher [`crate::tree::NodeAttributes::sort_weight`]
    /// earlier on disc, per §4.C; off by default (insertion order).
    pub sort_files_by_weight: bool,
    pub session: SessionOptions,
    /// Capacity, in 2048-byte blocks, of the ring buffer used by
    /// [`crate::pipeline::emit`]; ignored by [`crate::IsoImage::format_new`],
    /// which writes directly to a seekable destination. §6 recommends at
    /// least 32, default 1024.
    pub fifo_size: usize,
    #[cfg(feature = "el-torito")]
    pub boot: Option<BootOptions>,
    /// Caller-registered directory-record extensions (component J), run
    /// over every file/directory staged via [`crate::tree::LogicalTree`]
    /// during layout and emission. Empty by default: the core engine never
    /// writes Rock Ridge or any other system-use bytes on its own.
    pub extensions: Arc<ExtensionChain>,
}

fn align_to_sector(size: usize) -> usize {
    (size + 2047) & !2047
}

impl Default for FormatOption {
    fn default() -> Self {
        FormatOption {
            volume_name: "ISOIMAGE".to_string(),
            level: FileInterchange::L3,
            files: FileInput::empty(),
            system_area: None,
            strictness: Strictness::Default,
            joliet: false,
            iso1999: false,
            allow_deep_paths: false,
            allow_longer_paths: false,
            max_37_char_filenames: false,
            no_force_dots: false,
            allow_lowercase: false,
            allow_full_ascii: false,
            omit_version_numbers: false,
            joliet_longer_paths: false,
            sort_files_by_weight: false,
            session: SessionOptions::default(),
            fifo_size: 1024,
            #[cfg(feature = "el-torito")]
            boot: None,
            extensions: Arc::new(ExtensionChain::new()),
        }
    }
}

impl FormatOption {
    #[deprecated(since = "0.1.2", note = "Use `Default::default()` instead")]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the volume name, and returns a new FormatOption
    ///
    /// This is the name of the volume, and is used in the ISO 9660 volume descriptor
    pub fn with_volume_name(mut self, name: String) -> Self {
        self.volume_name = name;
        self
    }

    pub fn with_level(mut self, level: FileInterchange) -> Self {
        self.level = level;
        self
    }

    pub fn with_files(mut self, files: FileInput) -> Self {
        self.files = files;
        self
    }

    pub fn with_system_area(mut self, system_area: Vec<u8>) -> Self {
        self.system_area = Some(system_area);
        self
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_joliet(mut self, joliet: bool) -> Self {
        self.joliet = joliet;
        self
    }

    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    pub fn with_sort_files_by_weight(mut self, sort: bool) -> Self {
        self.sort_files_by_weight = sort;
        self
    }

    pub fn with_fifo_size(mut self, blocks: usize) -> Self {
        self.fifo_size = blocks;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionChain) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }

    #[cfg(feature = "el-torito")]
    pub fn with_boot_options(mut self, options: BootOptions) -> Self {
        self.boot = Some(options);
        self
    }

    /// Builds the [`crate::projection::ProjectionOptions`] for this format's
    /// primary tree, per the toggles in §6.
    pub fn projection_options(&self) -> crate::projection::ProjectionOptions {
        crate::projection::ProjectionOptions {
            kind: crate::projection::ProjectionKind::Primary,
            allow_deep_paths: self.allow_deep_paths,
            allow_longer_paths: self.allow_longer_paths,
            max_37_char_filenames: self.max_37_char_filenames
                || matches!(self.level, FileInterchange::L3),
            no_force_dots: self.no_force_dots,
            allow_lowercase: self.allow_lowercase
                || matches!(self.level, FileInterchange::NonConformant),
            allow_full_ascii: self.allow_full_ascii
                || matches!(self.level, FileInterchange::NonConformant),
            omit_version_numbers: self.omit_version_numbers
                || matches!(self.level, FileInterchange::NonConformant),
            joliet_longer_paths: self.joliet_longer_paths,
        }
    }

    pub fn check(&self) -> Result<(), &'static str> {
        if self.files.len() == 0 {
            return Err("No files provided");
        }

        #[cfg(feature = "el-torito")]
        if let Some(boot) = &self.boot {
            if boot.default.boot_image_path.is_empty() {
                return Err("Default boot image path is empty");
            }
        }

        Ok(())
    }

    /// Calculates the minimum and maximum size of the image
    pub fn image_len(&self) -> (u64, u64) {
        let mut min: u64 = 16 * 2048;
        let mut max: u64 = 16 * 2048;

        let mut path_table_size = 0;

        for file in &self.files {
            if file.is_directory() {
                min += 2048;
                max += 2048;
                path_table_size += (8 + file.path.len() + 1) & !1;
            } else {
                // We are conservative, and we add the minimum
                min += 34;
                // We assume every file is very large
                max += 2048;

                let size = align_to_sector(file.data.len()) as u64;
                min += size;
                max += size;
            }
        }

        // We align it and multiply by 2 because we need to store both the
        // little endian and big endian version
        let path_table_size = (align_to_sector(path_table_size) * 2) as u64;
        min += path_table_size;
        max += path_table_size;

        #[cfg(feature = "el-torito")]
        if let Some(boot) = &self.boot {
            // Boot Record Volume Descriptor
            min += 2048;
            max += 2048;

            // Catalog size
            // We add 64 because of the validation entry and default entry
            // The minimum size for a section is 64 bytes (header + 1 entry)
            // The maximum size can technically be more, but we just add 512 for now
            let min_catalog_size = align_to_sector(boot.entries.len() * 64 + 64) as u64;
            let max_catalog_size = align_to_sector(boot.entries.len() * 512 + 64) as u64;
            min += min_catalog_size;
            max += max_catalog_size;
        }

        // TODO: Minimum size is not correct, can be smaller
        (min, max)
    }
}

/// Options for El Torito supported ISO images
#[cfg(feature = "el-torito")]
#[derive(Debug, Clone)]
pub struct BootOptions {
    /// Whether to write the boot catalogue to a boot.catalog file
    pub write_boot_catalogue: bool,

    pub default: BootEntryOptions,
    pub entries: Vec<(BootSectionOptions, BootEntryOptions)>,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            write_boot_catalogue: false,
            default: BootEntryOptions::default(),
            entries: Vec::new(),
        }
    }
}

impl BootOptions {
    /// Adds a new default entry to the boot catalogue
    /// Returns a new BootOptions with the new entry
    pub fn with_default(mut self, default: BootEntryOptions) -> Self {
        self.default = default;
        self
    }

    /// Adds a new entry to the boot catalogue
    /// Returns a new BootOptions with the new entry
    pub fn with_entry(mut self, section: BootSectionOptions, entry: BootEntryOptions) -> Self {
        self.entries.push((section, entry));
        self
    }

    pub(crate) fn sections(&self) -> Vec<(Option<BootSectionOptions>, BootEntryOptions)> {
        let mut sections = Vec::new();
        sections.push((None, self.default.clone()));
        for (section, entry) in &self.entries {
            sections.push((Some(section.clone()), entry.clone()));
        }
        sections
    }

    pub(crate) fn entries(&self) -> Vec<BootEntryOptions> {
        let mut entries = Vec::new();
        entries.push(self.default.clone());
        for (_, entry) in &self.entries {
            entries.push(entry.clone());
        }
        entries
    }
}

#[derive(Debug, Clone)]
pub struct BootSectionOptions {
    pub platform_id: PlatformId,
}
impl Default for BootSectionOptions {
    fn default() -> Self {
        Self {
            platform_id: PlatformId::X80X86,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg(feature = "el-torito")]
pub struct BootEntryOptions {
    /// The amount of sectors to load
    pub load_size: u16,
    // The path to the boot image,
    // Currently on root directory is supported
    pub boot_image_path: String,

    /// Whether to write the boot info table, for bootloaders like:
    /// GRUB, LIMINE, SYSLINUX
    pub boot_info_table: bool,

    /// Whether to write the GRUB2 boot info table
    pub grub2_boot_info: bool,

    /// What type of emulation to use
    /// see [`EmulationType`]
    pub emulation: EmulationType,
}

impl Default for BootEntryOptions {
    fn default() -> Self {
        Self {
            load_size: 0,
            boot_image_path: String::new(),
            boot_info_table: false,
            grub2_boot_info: false,
            emulation: EmulationType::NoEmulation,
        }
    }
}
