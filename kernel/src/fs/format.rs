//! Writing a fresh FAT32 volume onto a device.

use config::CONFIG;
use log::info;

use super::disk::{BlockDevice, SECTOR_SIZE};
use super::error::{FsError, FsResult};
use super::fat::cluster_values;
use super::partition::{MasterBootRecord, PartitionEntry, partition_type, write_partition_table};
use super::volume::{BiosParameterBlock, FAT_ENTRIES_PER_SECTOR, FsInfo};

/// First LBA of the partition created by `format_disk` on a large enough device
const PARTITION_ALIGNMENT: u64 = 2048;

const ROOT_CLUSTER: u32 = 2;
const FS_INFO_SECTOR: u16 = 1;
const BACKUP_BOOT_SECTOR: u16 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub sectors_per_cluster: u8,
    pub fat_copies: u8,
    pub reserved_sectors: u16,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            sectors_per_cluster: CONFIG.default_sectors_per_cluster,
            fat_copies: CONFIG.default_fat_copies,
            reserved_sectors: CONFIG.default_reserved_sectors,
            volume_id: 0x5741_564F,
            volume_label: *b"NO NAME    ",
        }
    }
}

/// Sectors per FAT copy for a volume of `total_sectors`.
///
/// Grows the table until it covers every cluster left over after it.
fn fat_size_for(total_sectors: u64, opts: &FormatOptions) -> Option<u32> {
    let spc = opts.sectors_per_cluster as u64;
    let mut fat_size = 1u64;
    loop {
        let system = opts.reserved_sectors as u64 + opts.fat_copies as u64 * fat_size;
        let data = total_sectors.checked_sub(system)?;
        let clusters = data / spc;
        let needed = (clusters + 2).div_ceil(FAT_ENTRIES_PER_SECTOR as u64);
        if needed <= fat_size {
            return u32::try_from(fat_size).ok();
        }
        fat_size = needed;
    }
}

/// Write an empty FAT32 volume of `total_sectors` starting at `partition_lba`
pub fn format_volume<D: BlockDevice + ?Sized>(
    disk: &mut D,
    partition_lba: u64,
    total_sectors: u32,
    opts: &FormatOptions,
) -> FsResult<()> {
    if !opts.sectors_per_cluster.is_power_of_two()
        || opts.fat_copies == 0
        || opts.reserved_sectors <= BACKUP_BOOT_SECTOR
    {
        return Err(FsError::InvalidVolume);
    }
    let fat_size = fat_size_for(total_sectors as u64, opts).ok_or(FsError::InvalidVolume)?;
    let system = opts.reserved_sectors as u64 + opts.fat_copies as u64 * fat_size as u64;
    let clusters = (total_sectors as u64 - system) / opts.sectors_per_cluster as u64;
    if clusters == 0 {
        return Err(FsError::InvalidVolume);
    }
    let clusters = clusters as u32;

    let bpb = BiosParameterBlock {
        jump: [0xEB, 0x58, 0x90],
        oem_name: *b"WAVOS   ",
        bytes_per_sector: SECTOR_SIZE as u16,
        sectors_per_cluster: opts.sectors_per_cluster,
        reserved_sectors: opts.reserved_sectors,
        fat_copies: opts.fat_copies,
        root_dir_entries: 0,
        total_sectors_16: 0,
        media_type: 0xF8,
        fat_sectors_16: 0,
        sectors_per_track: 63,
        head_count: 255,
        hidden_sectors: partition_lba as u32,
        total_sectors_32: total_sectors,
        table_size: fat_size,
        ext_flags: 0,
        fat_version: 0,
        root_cluster: ROOT_CLUSTER,
        fs_info_sector: FS_INFO_SECTOR,
        backup_boot_sector: BACKUP_BOOT_SECTOR,
        drive_number: 0x80,
        boot_signature: 0x29,
        volume_id: opts.volume_id,
        volume_label: opts.volume_label,
        fat_type_label: *b"FAT32   ",
    };

    let zero = [0u8; SECTOR_SIZE];
    for s in 0..opts.reserved_sectors as u64 {
        disk.write_sector(partition_lba + s, &zero)?;
    }

    let mut sector = [0u8; SECTOR_SIZE];
    bpb.write_to(&mut sector);
    disk.write_sector(partition_lba, &sector)?;
    disk.write_sector(partition_lba + BACKUP_BOOT_SECTOR as u64, &sector)?;

    let mut sector = [0u8; SECTOR_SIZE];
    FsInfo {
        free_cluster_count: clusters - 1,
        free_cluster_hint: ROOT_CLUSTER,
    }
    .write_to(&mut sector);
    disk.write_sector(partition_lba + FS_INFO_SECTOR as u64, &sector)?;
    disk.write_sector(partition_lba + BACKUP_BOOT_SECTOR as u64 + 1, &sector)?;

    // media byte in entry 0, clean-shutdown bits in entry 1, root directory in entry 2
    let mut first_fat_sector = [0u8; SECTOR_SIZE];
    first_fat_sector[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
    first_fat_sector[4..8].copy_from_slice(&cluster_values::END_OF_CHAIN.to_le_bytes());
    first_fat_sector[8..12].copy_from_slice(&cluster_values::END_OF_CHAIN.to_le_bytes());

    let fat_start = partition_lba + opts.reserved_sectors as u64;
    for copy in 0..opts.fat_copies as u64 {
        let table = fat_start + copy * fat_size as u64;
        disk.write_sector(table, &first_fat_sector)?;
        for s in 1..fat_size as u64 {
            disk.write_sector(table + s, &zero)?;
        }
    }

    let root_lba = partition_lba + system;
    for s in 0..opts.sectors_per_cluster as u64 {
        disk.write_sector(root_lba + s, &zero)?;
    }
    disk.flush()?;

    info!(
        "formatted FAT32 volume at LBA {}: {} sectors, {} clusters, FAT of {} sectors",
        partition_lba, total_sectors, clusters, fat_size
    );
    Ok(())
}

/// Partition the whole device with one FAT32 partition and format it.
///
/// Returns the LBA the partition starts at.
pub fn format_disk<D: BlockDevice + ?Sized>(
    disk: &mut D,
    total_sectors: u64,
    opts: &FormatOptions,
) -> FsResult<u64> {
    let start = if total_sectors > 4 * PARTITION_ALIGNMENT {
        PARTITION_ALIGNMENT
    } else {
        1
    };
    let length = u32::try_from(total_sectors.saturating_sub(start)).map_err(|_| FsError::InvalidVolume)?;

    let mut mbr = MasterBootRecord::default();
    mbr.partitions[0] = PartitionEntry {
        bootable: false,
        partition_id: partition_type::FAT32_LBA,
        start_lba: start as u32,
        sector_count: length,
    };
    write_partition_table(disk, &mbr)?;
    format_volume(disk, start, length, opts)?;
    Ok(start)
}
