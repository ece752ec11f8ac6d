//! Volume descriptors (ECMA-119 §8): the fixed-size, 2048-byte records that
//! open an image and announce its extensions. [`VolumeDescriptorList`] is the
//! ordered set the writer chain builds during `compute-layout` and the
//! producer emits verbatim, one block per entry, immediately after the
//! system area.

use std::io::{Read, Seek, SeekFrom, Write};

use bytemuck::Zeroable;

use crate::directory::RootDirectoryEntry;
use crate::types::{BigEndian, Endian, IsoStrA, IsoStrD, LittleEndian, U16LsbMsb, U32, U32LsbMsb};

/// ECMA-119 §8.4: the primary volume descriptor, always present and always
/// the first descriptor after the system area.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrimaryVolumeDescriptor {
    pub descriptor_type: u8,
    pub id: [u8; 5],
    pub version: u8,
    unused1: u8,
    pub system_id: IsoStrA<32>,
    pub volume_id: IsoStrD<32>,
    unused2: [u8; 8],
    pub volume_space_size: U32LsbMsb,
    unused3: [u8; 32],
    pub volume_set_size: U16LsbMsb,
    pub volume_sequence_number: U16LsbMsb,
    pub logical_block_size: U16LsbMsb,
    pub path_table_size: U32LsbMsb,
    pub type_l_path_table: crate::types::U32<LittleEndian>,
    pub opt_type_l_path_table: crate::types::U32<LittleEndian>,
    pub type_m_path_table: crate::types::U32<BigEndian>,
    pub opt_type_m_path_table: crate::types::U32<BigEndian>,
    pub dir_record: RootDirectoryEntry,
    pub volume_set_id: IsoStrD<128>,
    pub publisher_id: IsoStrA<128>,
    pub data_preparer_id: IsoStrA<128>,
    pub application_id: IsoStrA<128>,
    pub copyright_file_id: IsoStrD<37>,
    pub abstract_file_id: IsoStrD<37>,
    pub bibliographic_file_id: IsoStrD<37>,
    pub creation_date: crate::types::DecDateTime,
    pub modification_date: crate::types::DecDateTime,
    pub expiration_date: crate::types::DecDateTime,
    pub effective_date: crate::types::DecDateTime,
    pub file_structure_version: u8,
    unused4: u8,
    pub application_data: [u8; 512],
    reserved: [u8; 653],
}

impl core::fmt::Debug for PrimaryVolumeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PrimaryVolumeDescriptor")
            .field("volume_id", &self.volume_id)
            .field("volume_space_size", &self.volume_space_size.read())
            .field("path_table_size", &self.path_table_size.read())
            .finish_non_exhaustive()
    }
}

impl PrimaryVolumeDescriptor {
    pub fn new(volume_id: &str, volume_space_size: u32) -> Self {
        let mut pvd = Self::zeroed();
        pvd.descriptor_type = 1;
        pvd.id = *b"CD001";
        pvd.version = 1;
        pvd.system_id = IsoStrA::empty();
        pvd.volume_id = IsoStrD::from_str(volume_id).unwrap_or_else(|_| IsoStrD::empty());
        pvd.volume_space_size = U32LsbMsb::new(volume_space_size);
        pvd.volume_set_size = U16LsbMsb::new(1);
        pvd.volume_sequence_number = U16LsbMsb::new(1);
        pvd.logical_block_size = U16LsbMsb::new(2048);
        pvd.file_structure_version = 1;
        pvd.creation_date = crate::types::DecDateTime::now();
        pvd.modification_date = crate::types::DecDateTime::now();
        pvd.expiration_date = crate::types::DecDateTime::unspecified();
        pvd.effective_date = crate::types::DecDateTime::now();
        pvd.dir_record = RootDirectoryEntry::zeroed();
        pvd
    }
}

/// ECMA-119 §8.2 / El Torito §2.1: the boot record volume descriptor, used
/// only when a boot catalog is present.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BootRecordVolumeDescriptor {
    pub descriptor_type: u8,
    pub id: [u8; 5],
    pub version: u8,
    pub boot_system_id: [u8; 32],
    pub boot_id: [u8; 32],
    pub catalog_ptr: U32<LittleEndian>,
    unused: [u8; 1973],
}

impl core::fmt::Debug for BootRecordVolumeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootRecordVolumeDescriptor")
            .field("catalog_ptr", &self.catalog_ptr.get())
            .finish_non_exhaustive()
    }
}

impl BootRecordVolumeDescriptor {
    pub fn new(catalog_ptr: u32) -> Self {
        let mut brvd = Self::zeroed();
        brvd.descriptor_type = 0;
        brvd.id = *b"CD001";
        brvd.version = 1;
        let system_id = b"EL TORITO SPECIFICATION";
        brvd.boot_system_id[..system_id.len()].copy_from_slice(system_id);
        brvd.catalog_ptr = U32::new(catalog_ptr);
        brvd
    }
}

/// ECMA-119 §8.5: the supplementary volume descriptor, used for the Joliet
/// extension. Names throughout this tree are encoded UTF-16BE (see
/// [`isoforge_common::str::utf16`]) rather than the primary tree's `d`/`a`
/// character sets, so only the fields the Joliet writer actually needs
/// differently are broken out; the rest mirror the primary layout.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SupplementaryVolumeDescriptor {
    pub descriptor_type: u8,
    pub id: [u8; 5],
    pub version: u8,
    pub flags: u8,
    pub system_id: [u8; 32],
    pub volume_id: [u8; 32],
    unused2: [u8; 8],
    pub volume_space_size: U32LsbMsb,
    pub escape_sequences: [u8; 32],
    pub volume_set_size: U16LsbMsb,
    pub volume_sequence_number: U16LsbMsb,
    pub logical_block_size: U16LsbMsb,
    pub path_table_size: U32LsbMsb,
    pub type_l_path_table: crate::types::U32<LittleEndian>,
    pub opt_type_l_path_table: crate::types::U32<LittleEndian>,
    pub type_m_path_table: crate::types::U32<BigEndian>,
    pub opt_type_m_path_table: crate::types::U32<BigEndian>,
    pub dir_record: RootDirectoryEntry,
    pub volume_set_id: [u8; 128],
    pub publisher_id: [u8; 128],
    pub data_preparer_id: [u8; 128],
    pub application_id: [u8; 128],
    pub copyright_file_id: [u8; 37],
    pub abstract_file_id: [u8; 37],
    pub bibliographic_file_id: [u8; 37],
    pub creation_date: crate::types::DecDateTime,
    pub modification_date: crate::types::DecDateTime,
    pub expiration_date: crate::types::DecDateTime,
    pub effective_date: crate::types::DecDateTime,
    pub file_structure_version: u8,
    unused4: u8,
    pub application_data: [u8; 512],
    reserved: [u8; 653],
}

/// The three escape sequences by which a Joliet supplementary volume
/// descriptor announces its UCS-2 level (2, 3, or 4).
pub const JOLIET_LEVEL_3_ESCAPE: [u8; 3] = [0x25, 0x2F, 0x45];

impl SupplementaryVolumeDescriptor {
    pub fn new_joliet(volume_id: &str, volume_space_size: u32) -> Self {
        let mut svd = Self::zeroed();
        svd.descriptor_type = 2;
        svd.id = *b"CD001";
        svd.version = 1;
        svd.escape_sequences[..3].copy_from_slice(&JOLIET_LEVEL_3_ESCAPE);
        let encoded = isoforge_common::str::utf16::encode_utf16_be(volume_id);
        let len = encoded.len().min(svd.volume_id.len());
        svd.volume_id[..len].copy_from_slice(&encoded[..len]);
        svd.volume_space_size = U32LsbMsb::new(volume_space_size);
        svd.volume_set_size = U16LsbMsb::new(1);
        svd.volume_sequence_number = U16LsbMsb::new(1);
        svd.logical_block_size = U16LsbMsb::new(2048);
        svd.file_structure_version = 1;
        svd.creation_date = crate::types::DecDateTime::now();
        svd.modification_date = crate::types::DecDateTime::now();
        svd.expiration_date = crate::types::DecDateTime::unspecified();
        svd.effective_date = crate::types::DecDateTime::now();
        svd.dir_record = RootDirectoryEntry::zeroed();
        svd
    }
}

/// ECMA-119 §8.3: terminates the volume descriptor set.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VolumeDescriptorSetTerminator {
    pub descriptor_type: u8,
    pub id: [u8; 5],
    pub version: u8,
    reserved: [u8; 2041],
}

impl VolumeDescriptorSetTerminator {
    pub fn new() -> Self {
        let mut term = Self::zeroed();
        term.descriptor_type = 255;
        term.id = *b"CD001";
        term.version = 1;
        term
    }
}

/// One descriptor in the volume descriptor set, tagged by which writer
/// produced it so [`VolumeDescriptorList`] can find the one it needs to
/// patch after layout is known.
#[derive(Debug, Clone)]
pub enum VolumeDescriptor {
    Primary(PrimaryVolumeDescriptor),
    Supplementary(SupplementaryVolumeDescriptor),
    BootRecord(BootRecordVolumeDescriptor),
}

impl core::fmt::Debug for SupplementaryVolumeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SupplementaryVolumeDescriptor")
            .field("volume_space_size", &self.volume_space_size.read())
            .finish_non_exhaustive()
    }
}

impl VolumeDescriptor {
    fn as_bytes(&self) -> &[u8] {
        match self {
            VolumeDescriptor::Primary(pvd) => bytemuck::bytes_of(pvd),
            VolumeDescriptor::Supplementary(svd) => bytemuck::bytes_of(svd),
            VolumeDescriptor::BootRecord(brvd) => bytemuck::bytes_of(brvd),
        }
    }
}

/// The ordered set of volume descriptors plus the mandatory terminator. The
/// primary ECMA-119 writer's descriptor always comes first; every other
/// descriptor follows in writer-chain order (§4.E).
#[derive(Debug, Clone)]
pub struct VolumeDescriptorList {
    pub descriptors: Vec<VolumeDescriptor>,
}

impl VolumeDescriptorList {
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn push(&mut self, descriptor: VolumeDescriptor) {
        self.descriptors.push(descriptor);
    }

    /// Total bytes occupied by this descriptor set plus its terminator: one
    /// 2048-byte block per descriptor.
    pub fn size_required(&self) -> usize {
        (self.descriptors.len() + 1) * 2048
    }

    pub fn primary(&self) -> &PrimaryVolumeDescriptor {
        self.descriptors
            .iter()
            .find_map(|d| match d {
                VolumeDescriptor::Primary(pvd) => Some(pvd),
                _ => None,
            })
            .expect("a volume descriptor list always has a primary descriptor")
    }

    pub fn primary_mut(&mut self) -> &mut PrimaryVolumeDescriptor {
        self.descriptors
            .iter_mut()
            .find_map(|d| match d {
                VolumeDescriptor::Primary(pvd) => Some(pvd),
                _ => None,
            })
            .expect("a volume descriptor list always has a primary descriptor")
    }

    pub fn supplementary(&self) -> Option<&SupplementaryVolumeDescriptor> {
        self.descriptors.iter().find_map(|d| match d {
            VolumeDescriptor::Supplementary(svd) => Some(svd),
            _ => None,
        })
    }

    pub fn supplementary_mut(&mut self) -> Option<&mut SupplementaryVolumeDescriptor> {
        self.descriptors.iter_mut().find_map(|d| match d {
            VolumeDescriptor::Supplementary(svd) => Some(svd),
            _ => None,
        })
    }

    pub fn boot_record(&self) -> Option<&BootRecordVolumeDescriptor> {
        self.descriptors.iter().find_map(|d| match d {
            VolumeDescriptor::BootRecord(brvd) => Some(brvd),
            _ => None,
        })
    }

    pub fn boot_record_mut(&mut self) -> Option<&mut BootRecordVolumeDescriptor> {
        self.descriptors.iter_mut().find_map(|d| match d {
            VolumeDescriptor::BootRecord(brvd) => Some(brvd),
            _ => None,
        })
    }

    /// Writes every descriptor followed by the set terminator, one block
    /// each, per the fixed emission order in §4.E/§4.G.
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> std::io::Result<()> {
        for descriptor in &self.descriptors {
            writer.write_all(descriptor.as_bytes())?;
        }
        writer.write_all(bytemuck::bytes_of(&VolumeDescriptorSetTerminator::new()))?;
        Ok(())
    }

    pub fn parse<R: Read + Seek>(reader: &mut R) -> std::io::Result<Self> {
        let mut descriptors = Vec::new();
        loop {
            let mut header = [0u8; 7];
            reader.read_exact(&mut header)?;
            reader.seek(SeekFrom::Current(-7))?;
            match header[0] {
                255 => {
                    reader.seek(SeekFrom::Current(2048))?;
                    break;
                }
                1 => {
                    let mut pvd = PrimaryVolumeDescriptor::zeroed();
                    reader.read_exact(bytemuck::bytes_of_mut(&mut pvd))?;
                    descriptors.push(VolumeDescriptor::Primary(pvd));
                }
                2 => {
                    let mut svd = SupplementaryVolumeDescriptor::zeroed();
                    reader.read_exact(bytemuck::bytes_of_mut(&mut svd))?;
                    descriptors.push(VolumeDescriptor::Supplementary(svd));
                }
                0 => {
                    let mut brvd = BootRecordVolumeDescriptor::zeroed();
                    reader.read_exact(bytemuck::bytes_of_mut(&mut brvd))?;
                    descriptors.push(VolumeDescriptor::BootRecord(brvd));
                }
                other => {
                    log::warn!("Skipping unrecognized volume descriptor type {other}");
                    reader.seek(SeekFrom::Current(2048))?;
                }
            }
        }
        Ok(Self { descriptors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_eq_size!(PrimaryVolumeDescriptor, [u8; 2048]);
    static_assertions::assert_eq_size!(BootRecordVolumeDescriptor, [u8; 2048]);
    static_assertions::assert_eq_size!(SupplementaryVolumeDescriptor, [u8; 2048]);
    static_assertions::assert_eq_size!(VolumeDescriptorSetTerminator, [u8; 2048]);

    #[test]
    fn primary_round_trips_volume_id() {
        let pvd = PrimaryVolumeDescriptor::new("EMPTY", 32);
        assert_eq!(pvd.volume_id.to_str(), "EMPTY");
        assert_eq!(pvd.volume_space_size.read(), 32);
    }

    #[test]
    fn list_size_required_accounts_for_terminator() {
        let mut list = VolumeDescriptorList::empty();
        list.push(VolumeDescriptor::Primary(PrimaryVolumeDescriptor::new(
            "X", 0,
        )));
        assert_eq!(list.size_required(), 2 * 2048);
    }
}
