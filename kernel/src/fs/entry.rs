//! 32-byte directory slot records.
//!
//! A directory is a flat stream of 32-byte slots. A slot is either a short
//! (8.3) entry describing a file or directory, or a long-name fragment that
//! precedes its short entry. The first name byte doubles as a status marker.

use bitflags::bitflags;

use super::disk::SECTOR_SIZE;

/// Directory slot size
pub const DIR_ENTRY_SIZE: usize = 32;

/// Slots in one sector
pub const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

/// UTF-16 code units carried by one long-name slot
pub const LFN_CHARS_PER_ENTRY: usize = 13;

/// Longest long name in UTF-16 code units
pub const MAX_LFN_LENGTH: usize = 255;

/// Special first byte values
pub mod entry_status {
    /// Slot is free and so is every slot after it
    pub const END_OF_DIRECTORY: u8 = 0x00;
    /// Slot was deleted and may be reused
    pub const DELETED: u8 = 0xE5;
    /// A real leading 0xE5 is stored as 0x05
    pub const KANJI: u8 = 0x05;
    pub const DOT: u8 = 0x2E;
}

bitflags! {
    /// Attribute byte of a short entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        /// Marker combination used by long-name slots
        const LONG_NAME = Self::READ_ONLY.bits()
            | Self::HIDDEN.bits()
            | Self::SYSTEM.bits()
            | Self::VOLUME_ID.bits();
    }
}

/// True for a slot that holds a long-name fragment
pub fn is_lfn_slot(raw: &[u8]) -> bool {
    Attributes::from_bits_retain(raw[11]).contains(Attributes::LONG_NAME)
}

/// True for a slot that can take a new entry
pub fn is_free_slot(raw: &[u8]) -> bool {
    matches!(
        raw[0],
        entry_status::END_OF_DIRECTORY | entry_status::DELETED
    )
}

/// Short (8.3) directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Eight name bytes followed by three extension bytes, space padded
    pub name: [u8; 11],
    pub attributes: Attributes,
    pub nt_reserved: u8,
    pub create_time_tenth: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub first_cluster: u32,
    pub write_time: u16,
    pub write_date: u16,
    pub size: u32,
}

impl DirEntry {
    pub fn new(name: [u8; 11], attributes: Attributes, first_cluster: u32, size: u32) -> Self {
        DirEntry {
            name,
            attributes,
            nt_reserved: 0,
            create_time_tenth: 0,
            create_time: 0,
            create_date: 0,
            access_date: 0,
            first_cluster,
            write_time: 0,
            write_date: 0,
            size,
        }
    }

    /// The `.` entry of a directory starting at `cluster`
    pub fn dot(cluster: u32) -> Self {
        let mut name = [b' '; 11];
        name[0] = b'.';
        Self::new(name, Attributes::DIRECTORY, cluster, 0)
    }

    /// The `..` entry pointing at `parent` (0 stands for the root directory)
    pub fn dot_dot(parent: u32) -> Self {
        let mut name = [b' '; 11];
        name[0] = b'.';
        name[1] = b'.';
        Self::new(name, Attributes::DIRECTORY, parent, 0)
    }

    /// Decode the first 32 bytes of `raw`
    pub fn parse(raw: &[u8]) -> Self {
        let u16_at = |off: usize| u16::from_le_bytes([raw[off], raw[off + 1]]);
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);

        let cluster_hi = u16_at(20) as u32;
        let cluster_lo = u16_at(26) as u32;

        DirEntry {
            name,
            attributes: Attributes::from_bits_retain(raw[11]),
            nt_reserved: raw[12],
            create_time_tenth: raw[13],
            create_time: u16_at(14),
            create_date: u16_at(16),
            access_date: u16_at(18),
            first_cluster: (cluster_hi << 16) | cluster_lo,
            write_time: u16_at(22),
            write_date: u16_at(24),
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    /// Encode into the first 32 bytes of `raw`
    pub fn write_to(&self, raw: &mut [u8]) {
        raw[0..11].copy_from_slice(&self.name);
        raw[11] = self.attributes.bits();
        raw[12] = self.nt_reserved;
        raw[13] = self.create_time_tenth;
        raw[14..16].copy_from_slice(&self.create_time.to_le_bytes());
        raw[16..18].copy_from_slice(&self.create_date.to_le_bytes());
        raw[18..20].copy_from_slice(&self.access_date.to_le_bytes());
        raw[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        raw[22..24].copy_from_slice(&self.write_time.to_le_bytes());
        raw[24..26].copy_from_slice(&self.write_date.to_le_bytes());
        raw[26..28].copy_from_slice(&((self.first_cluster & 0xFFFF) as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&self.size.to_le_bytes());
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes.contains(Attributes::VOLUME_ID) && !self.attributes.contains(Attributes::LONG_NAME)
    }

    /// `.` or `..`
    pub fn is_dot_entry(&self) -> bool {
        self.name[0] == entry_status::DOT
    }
}

/// Offsets of the thirteen UTF-16 units inside a long-name slot
const LFN_UNIT_OFFSETS: [usize; LFN_CHARS_PER_ENTRY] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

/// Long-name fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfnEntry {
    /// Sequence number in the low six bits, `LAST_ENTRY` on the final fragment
    pub order: u8,
    /// Checksum of the paired short name
    pub checksum: u8,
    pub units: [u16; LFN_CHARS_PER_ENTRY],
}

impl LfnEntry {
    /// Set on the logically last fragment, which is stored first on disk
    pub const LAST_ENTRY: u8 = 0x40;

    pub fn sequence(&self) -> u8 {
        self.order & 0x3F
    }

    pub fn is_last(&self) -> bool {
        self.order & Self::LAST_ENTRY != 0
    }

    pub fn parse(raw: &[u8]) -> Self {
        let mut units = [0u16; LFN_CHARS_PER_ENTRY];
        for (unit, &off) in units.iter_mut().zip(LFN_UNIT_OFFSETS.iter()) {
            *unit = u16::from_le_bytes([raw[off], raw[off + 1]]);
        }
        LfnEntry {
            order: raw[0],
            checksum: raw[13],
            units,
        }
    }

    pub fn write_to(&self, raw: &mut [u8]) {
        raw[0] = self.order;
        for (&unit, &off) in self.units.iter().zip(LFN_UNIT_OFFSETS.iter()) {
            raw[off..off + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw[11] = Attributes::LONG_NAME.bits();
        raw[12] = 0;
        raw[13] = self.checksum;
        raw[26] = 0;
        raw[27] = 0;
    }
}
