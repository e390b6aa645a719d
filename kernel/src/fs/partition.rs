//! Master boot record parsing and mounting of the primary partitions.

use alloc::vec::Vec;
use config::CONFIG;
use log::{info, warn};

use super::disk::{BlockDevice, SECTOR_SIZE};
use super::error::{FsError, FsResult};
use super::volume::{VolumeDescriptor, mount};

const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
pub const MBR_SIGNATURE: u16 = 0xAA55;

/// Partition type ids
pub mod partition_type {
    pub const EMPTY: u8 = 0x00;
    pub const FAT32_CHS: u8 = 0x0B;
    pub const FAT32_LBA: u8 = 0x0C;
}

/// One of the four primary partition slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub partition_id: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn parse(raw: &[u8]) -> Self {
        PartitionEntry {
            bootable: raw[0] == 0x80,
            partition_id: raw[4],
            start_lba: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            sector_count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    /// Encode into a 16-byte slot. CHS fields are left zero; everything here is LBA.
    pub fn write_to(&self, raw: &mut [u8]) {
        raw[..PARTITION_ENTRY_SIZE].fill(0);
        raw[0] = if self.bootable { 0x80 } else { 0x00 };
        raw[4] = self.partition_id;
        raw[8..12].copy_from_slice(&self.start_lba.to_le_bytes());
        raw[12..16].copy_from_slice(&self.sector_count.to_le_bytes());
    }

    pub fn is_used(&self) -> bool {
        self.partition_id != partition_type::EMPTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasterBootRecord {
    pub partitions: [PartitionEntry; 4],
}

impl MasterBootRecord {
    pub fn parse(sector: &[u8]) -> FsResult<Self> {
        let signature = u16::from_le_bytes([sector[510], sector[511]]);
        if signature != MBR_SIGNATURE {
            return Err(FsError::InvalidPartitionTable);
        }

        let mut partitions = [PartitionEntry::default(); 4];
        for (i, partition) in partitions.iter_mut().enumerate() {
            let start = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            *partition = PartitionEntry::parse(&sector[start..start + PARTITION_ENTRY_SIZE]);
        }
        Ok(MasterBootRecord { partitions })
    }

    /// Write the table and signature, keeping the boot code bytes in `sector`
    pub fn write_to(&self, sector: &mut [u8]) {
        for (i, partition) in self.partitions.iter().enumerate() {
            let start = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            partition.write_to(&mut sector[start..start + PARTITION_ENTRY_SIZE]);
        }
        sector[510..512].copy_from_slice(&MBR_SIGNATURE.to_le_bytes());
    }
}

pub fn read_partition_table<D: BlockDevice + ?Sized>(disk: &mut D) -> FsResult<MasterBootRecord> {
    let mut sector = [0u8; SECTOR_SIZE];
    disk.read_sector(0, &mut sector)?;
    MasterBootRecord::parse(&sector)
}

pub fn write_partition_table<D: BlockDevice + ?Sized>(
    disk: &mut D,
    mbr: &MasterBootRecord,
) -> FsResult<()> {
    let mut sector = [0u8; SECTOR_SIZE];
    disk.read_sector(0, &mut sector)?;
    mbr.write_to(&mut sector);
    disk.write_sector(0, &sector)?;
    disk.flush()?;
    Ok(())
}

/// Mount every used primary partition.
///
/// A partition that does not hold a usable FAT32 volume is logged and
/// skipped; only a broken MBR fails the whole call.
pub fn mount_partitions<D: BlockDevice + ?Sized>(disk: &mut D) -> FsResult<Vec<VolumeDescriptor>> {
    let mbr = read_partition_table(disk)?;
    let mut volumes = Vec::new();

    for (index, partition) in mbr
        .partitions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_used())
        .take(CONFIG.max_partitions)
    {
        match mount(disk, partition.start_lba as u64) {
            Ok(volume) => volumes.push(volume),
            Err(err) => warn!(
                "partition {} (id {:#04x}, LBA {}): {}",
                index, partition.partition_id, partition.start_lba, err
            ),
        }
    }

    info!("{} FAT32 partition(s) mounted", volumes.len());
    Ok(volumes)
}
