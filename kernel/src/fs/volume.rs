//! FAT32 boot sector, FSInfo sector and the in-memory volume descriptor.
//!
//! # Boot Sector Layout (512 bytes)
//! - Bytes 0-2: Jump instruction
//! - Bytes 3-10: OEM name
//! - Bytes 11-35: BPB (BIOS Parameter Block)
//! - Bytes 36-89: Extended BPB (FAT32 specific)
//! - Bytes 90-509: Boot code
//! - Bytes 510-511: Signature (0x55, 0xAA)

use alloc::string::String;
use log::{info, warn};

use super::disk::{BlockDevice, SECTOR_SIZE};
use super::error::{FsError, FsResult};
use super::fat32::Fat32FileSystem;

/// FAT32 entries held by one FAT sector
pub const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;

/// BIOS Parameter Block with the FAT32 extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosParameterBlock {
    pub jump: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_copies: u8,
    /// Always 0 on FAT32
    pub root_dir_entries: u16,
    pub total_sectors_16: u16,
    pub media_type: u8,
    /// Always 0 on FAT32
    pub fat_sectors_16: u16,
    pub sectors_per_track: u16,
    pub head_count: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,

    // FAT32 specific fields
    /// Sectors occupied by one FAT copy
    pub table_size: u32,
    pub ext_flags: u16,
    pub fat_version: u16,
    pub root_cluster: u32,
    /// Sector of the FSInfo block, relative to the partition start
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub drive_number: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fat_type_label: [u8; 8],
}

impl BiosParameterBlock {
    pub fn parse(buf: &[u8]) -> Self {
        let u16_at = |off: usize| u16::from_le_bytes([buf[off], buf[off + 1]]);
        let u32_at =
            |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);

        let mut jump = [0u8; 3];
        jump.copy_from_slice(&buf[0..3]);
        let mut oem_name = [0u8; 8];
        oem_name.copy_from_slice(&buf[3..11]);
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&buf[71..82]);
        let mut fat_type_label = [0u8; 8];
        fat_type_label.copy_from_slice(&buf[82..90]);

        BiosParameterBlock {
            jump,
            oem_name,
            bytes_per_sector: u16_at(11),
            sectors_per_cluster: buf[13],
            reserved_sectors: u16_at(14),
            fat_copies: buf[16],
            root_dir_entries: u16_at(17),
            total_sectors_16: u16_at(19),
            media_type: buf[21],
            fat_sectors_16: u16_at(22),
            sectors_per_track: u16_at(24),
            head_count: u16_at(26),
            hidden_sectors: u32_at(28),
            total_sectors_32: u32_at(32),
            table_size: u32_at(36),
            ext_flags: u16_at(40),
            fat_version: u16_at(42),
            root_cluster: u32_at(44),
            fs_info_sector: u16_at(48),
            backup_boot_sector: u16_at(50),
            drive_number: buf[64],
            boot_signature: buf[66],
            volume_id: u32_at(67),
            volume_label,
            fat_type_label,
        }
    }

    /// Encode into a boot sector image, including the 0xAA55 signature
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..3].copy_from_slice(&self.jump);
        buf[3..11].copy_from_slice(&self.oem_name);
        buf[11..13].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        buf[13] = self.sectors_per_cluster;
        buf[14..16].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        buf[16] = self.fat_copies;
        buf[17..19].copy_from_slice(&self.root_dir_entries.to_le_bytes());
        buf[19..21].copy_from_slice(&self.total_sectors_16.to_le_bytes());
        buf[21] = self.media_type;
        buf[22..24].copy_from_slice(&self.fat_sectors_16.to_le_bytes());
        buf[24..26].copy_from_slice(&self.sectors_per_track.to_le_bytes());
        buf[26..28].copy_from_slice(&self.head_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.hidden_sectors.to_le_bytes());
        buf[32..36].copy_from_slice(&self.total_sectors_32.to_le_bytes());
        buf[36..40].copy_from_slice(&self.table_size.to_le_bytes());
        buf[40..42].copy_from_slice(&self.ext_flags.to_le_bytes());
        buf[42..44].copy_from_slice(&self.fat_version.to_le_bytes());
        buf[44..48].copy_from_slice(&self.root_cluster.to_le_bytes());
        buf[48..50].copy_from_slice(&self.fs_info_sector.to_le_bytes());
        buf[50..52].copy_from_slice(&self.backup_boot_sector.to_le_bytes());
        buf[52..64].fill(0);
        buf[64] = self.drive_number;
        buf[65] = 0;
        buf[66] = self.boot_signature;
        buf[67..71].copy_from_slice(&self.volume_id.to_le_bytes());
        buf[71..82].copy_from_slice(&self.volume_label);
        buf[82..90].copy_from_slice(&self.fat_type_label);
        buf[510] = 0x55;
        buf[511] = 0xAA;
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }
}

/// FSInfo sector contents (FAT32 only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    /// Free clusters on the volume, `UNKNOWN` if never computed
    pub free_cluster_count: u32,
    /// Where to start looking for a free cluster, `UNKNOWN` if no hint
    pub free_cluster_hint: u32,
}

impl FsInfo {
    pub const LEAD_SIG: u32 = 0x4161_5252;
    pub const STRUCT_SIG: u32 = 0x6141_7272;
    pub const TRAIL_SIG: u32 = 0xAA55_0000;
    pub const UNKNOWN: u32 = 0xFFFF_FFFF;

    /// Decode a FSInfo sector, `None` when any signature is wrong
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let u32_at =
            |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        if u32_at(0) != Self::LEAD_SIG
            || u32_at(0x1E4) != Self::STRUCT_SIG
            || u32_at(0x1FC) != Self::TRAIL_SIG
        {
            return None;
        }
        Some(FsInfo {
            free_cluster_count: u32_at(0x1E8),
            free_cluster_hint: u32_at(0x1EC),
        })
    }

    /// Write counters and signatures into `buf`, leaving reserved bytes alone
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&Self::LEAD_SIG.to_le_bytes());
        buf[0x1E4..0x1E8].copy_from_slice(&Self::STRUCT_SIG.to_le_bytes());
        buf[0x1E8..0x1EC].copy_from_slice(&self.free_cluster_count.to_le_bytes());
        buf[0x1EC..0x1F0].copy_from_slice(&self.free_cluster_hint.to_le_bytes());
        buf[0x1FC..0x200].copy_from_slice(&Self::TRAIL_SIG.to_le_bytes());
    }
}

/// Everything the engine needs to know about one mounted partition.
///
/// All LBAs are absolute device LBAs; the partition offset is already folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub partition_lba: u64,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_copies: u8,
    pub table_size_sectors: u32,
    pub root_dir_cluster: u32,
    pub fat_start_lba: u64,
    pub fat_size_sectors: u32,
    pub data_start_lba: u64,
    /// Number of data clusters; valid cluster indices are `2..cluster_count + 2`
    pub cluster_count: u32,
    /// Absolute LBA of the FSInfo sector, if the volume has one
    pub fs_info_lba: Option<u64>,
    pub free_cluster_count: u32,
    pub free_cluster_hint: u32,
    pub volume_label: [u8; 11],
    pub cwd_cluster: u32,
    pub cwd_path: String,
}

impl VolumeDescriptor {
    /// Build a descriptor from a parsed boot sector, rejecting unusable geometry
    pub fn from_bpb(bpb: &BiosParameterBlock, partition_lba: u64) -> FsResult<Self> {
        if bpb.bytes_per_sector as usize != SECTOR_SIZE {
            return Err(FsError::InvalidVolume);
        }
        if !bpb.sectors_per_cluster.is_power_of_two() {
            return Err(FsError::InvalidVolume);
        }
        if bpb.fat_copies == 0 || bpb.table_size == 0 || bpb.reserved_sectors == 0 {
            return Err(FsError::InvalidVolume);
        }

        let fat_start_lba = partition_lba + bpb.reserved_sectors as u64;
        let fat_region = bpb.fat_copies as u64 * bpb.table_size as u64;
        let data_start_lba = fat_start_lba + fat_region;

        let system_sectors = bpb.reserved_sectors as u64 + fat_region;
        let total_sectors = bpb.total_sectors() as u64;
        if total_sectors <= system_sectors {
            return Err(FsError::InvalidVolume);
        }
        let data_clusters = (total_sectors - system_sectors) / bpb.sectors_per_cluster as u64;
        // the FAT must have an entry for every cluster, entries 0 and 1 are reserved
        let fat_capacity = (bpb.table_size as u64 * FAT_ENTRIES_PER_SECTOR as u64).saturating_sub(2);
        let cluster_count = data_clusters.min(fat_capacity).min(0x0FFF_FFF5) as u32;

        if cluster_count == 0 || bpb.root_cluster < 2 || bpb.root_cluster >= cluster_count + 2 {
            return Err(FsError::InvalidVolume);
        }

        let fs_info_lba = match bpb.fs_info_sector {
            0 | 0xFFFF => None,
            s if s >= bpb.reserved_sectors => None,
            s => Some(partition_lba + s as u64),
        };

        Ok(VolumeDescriptor {
            partition_lba,
            bytes_per_sector: bpb.bytes_per_sector,
            sectors_per_cluster: bpb.sectors_per_cluster,
            reserved_sectors: bpb.reserved_sectors,
            fat_copies: bpb.fat_copies,
            table_size_sectors: bpb.table_size,
            root_dir_cluster: bpb.root_cluster,
            fat_start_lba,
            fat_size_sectors: bpb.table_size,
            data_start_lba,
            cluster_count,
            fs_info_lba,
            free_cluster_count: FsInfo::UNKNOWN,
            free_cluster_hint: FsInfo::UNKNOWN,
            volume_label: bpb.volume_label,
            cwd_cluster: bpb.root_cluster,
            cwd_path: String::from("/"),
        })
    }

    /// Bytes in one cluster
    pub fn cluster_bytes(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// First absolute LBA of a data cluster.
    ///
    /// Indices outside the data region come from damaged chains or entries
    /// and are reported as `CorruptChain`.
    pub fn cluster_to_lba(&self, cluster: u32) -> FsResult<u64> {
        if !self.is_data_cluster(cluster) {
            return Err(FsError::CorruptChain);
        }
        Ok(self.data_start_lba + self.sectors_per_cluster as u64 * (cluster as u64 - 2))
    }

    /// True for an index that names an existing data cluster
    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster < self.cluster_count + 2
    }

    /// Clusters needed to hold `bytes`
    pub fn clusters_for(&self, bytes: u64) -> u32 {
        bytes.div_ceil(self.cluster_bytes() as u64) as u32
    }

    /// Write the free counters back into the FSInfo sector
    pub fn persist_fs_info<D: BlockDevice + ?Sized>(&self, disk: &mut D) -> FsResult<()> {
        let Some(lba) = self.fs_info_lba else {
            return Ok(());
        };
        let mut sector = [0u8; SECTOR_SIZE];
        disk.read_sector(lba, &mut sector)?;
        FsInfo {
            free_cluster_count: self.free_cluster_count,
            free_cluster_hint: self.free_cluster_hint,
        }
        .write_to(&mut sector);
        disk.write_sector(lba, &sector)?;
        disk.flush()?;
        Ok(())
    }
}

/// Mount the FAT32 volume whose boot sector sits at `partition_lba`.
///
/// Reads the BPB and the FSInfo sector. When FSInfo is missing, damaged or
/// reports an impossible free count, the FAT is scanned and FSInfo rewritten.
pub fn mount<D: BlockDevice + ?Sized>(disk: &mut D, partition_lba: u64) -> FsResult<VolumeDescriptor> {
    let mut sector = [0u8; SECTOR_SIZE];
    disk.read_sector(partition_lba, &mut sector)?;
    let bpb = BiosParameterBlock::parse(&sector);
    let mut volume = VolumeDescriptor::from_bpb(&bpb, partition_lba)?;

    let fs_info = match volume.fs_info_lba {
        Some(lba) => {
            disk.read_sector(lba, &mut sector)?;
            FsInfo::parse(&sector)
        }
        None => None,
    };

    match fs_info {
        Some(info) if info.free_cluster_count <= volume.cluster_count => {
            volume.free_cluster_count = info.free_cluster_count;
            volume.free_cluster_hint = info.free_cluster_hint;
        }
        _ => {
            warn!(
                "volume at LBA {}: FSInfo unusable, recounting free clusters",
                partition_lba
            );
            let free = Fat32FileSystem::new(&mut *disk, &mut volume).count_free_clusters()?;
            volume.free_cluster_count = free;
            volume.persist_fs_info(disk)?;
        }
    }

    info!(
        "mounted FAT32 volume at LBA {}: {} clusters of {} bytes, {} free, root at cluster {}",
        partition_lba,
        volume.cluster_count,
        volume.cluster_bytes(),
        volume.free_cluster_count,
        volume.root_dir_cluster
    );
    Ok(volume)
}
