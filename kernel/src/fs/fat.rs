//! File allocation table access and cluster chain management.
//!
//! Every FAT mutation is written to all FAT copies. The free counters live in
//! the volume descriptor and are pushed to the FSInfo sector after each
//! allocation or release.

use alloc::vec::Vec;
use log::{debug, trace, warn};

use super::disk::{BlockDevice, SECTOR_SIZE};
use super::error::{FsError, FsResult};
use super::fat32::Fat32FileSystem;
use super::volume::FAT_ENTRIES_PER_SECTOR;

/// Special FAT entry values
pub mod cluster_values {
    pub const FREE: u32 = 0x0000_0000;
    pub const BAD: u32 = 0x0FFF_FFF7;
    /// Lowest value treated as end of chain
    pub const END_OF_CHAIN_MIN: u32 = 0x0FFF_FFF8;
    /// Value written when terminating a chain
    pub const END_OF_CHAIN: u32 = 0x0FFF_FFFF;
    /// FAT32 entries only use the low 28 bits
    pub const ENTRY_MASK: u32 = 0x0FFF_FFFF;
}

pub fn is_end_of_chain(value: u32) -> bool {
    value >= cluster_values::END_OF_CHAIN_MIN
}

impl<D: BlockDevice + ?Sized> Fat32FileSystem<'_, D> {
    /// Sector of the first FAT copy holding `cluster`, and the byte offset inside it
    fn fat_position(&self, cluster: u32) -> (u64, usize) {
        let sector = (cluster / FAT_ENTRIES_PER_SECTOR) as u64;
        let offset = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
        (self.volume.fat_start_lba + sector, offset)
    }

    pub fn read_entry(&mut self, cluster: u32) -> FsResult<u32> {
        let (lba, offset) = self.fat_position(cluster);
        let mut sector = [0u8; SECTOR_SIZE];
        self.disk.read_sector(lba, &mut sector)?;
        let raw = u32::from_le_bytes([
            sector[offset],
            sector[offset + 1],
            sector[offset + 2],
            sector[offset + 3],
        ]);
        Ok(raw & cluster_values::ENTRY_MASK)
    }

    /// Store `value` in every FAT copy, keeping the reserved top four bits
    pub fn write_entry(&mut self, cluster: u32, value: u32) -> FsResult<()> {
        let (first_lba, offset) = self.fat_position(cluster);
        let mut sector = [0u8; SECTOR_SIZE];

        for copy in 0..self.volume.fat_copies as u64 {
            let lba = first_lba + copy * self.volume.table_size_sectors as u64;
            self.disk.read_sector(lba, &mut sector)?;
            let old = u32::from_le_bytes([
                sector[offset],
                sector[offset + 1],
                sector[offset + 2],
                sector[offset + 3],
            ]);
            let new = (old & !cluster_values::ENTRY_MASK) | (value & cluster_values::ENTRY_MASK);
            sector[offset..offset + 4].copy_from_slice(&new.to_le_bytes());
            self.disk.write_sector(lba, &sector)?;
            self.disk.flush()?;
        }
        Ok(())
    }

    /// First free cluster on the volume, scanning upward from cluster 2
    pub fn find_free_cluster(&mut self) -> FsResult<Option<u32>> {
        self.find_free_cluster_from(2)
    }

    fn find_free_cluster_from(&mut self, start: u32) -> FsResult<Option<u32>> {
        let end = self.volume.cluster_count + 2;
        let mut sector = [0u8; SECTOR_SIZE];
        let mut loaded: Option<u64> = None;

        for cluster in start.max(2)..end {
            let (lba, offset) = self.fat_position(cluster);
            if loaded != Some(lba) {
                self.disk.read_sector(lba, &mut sector)?;
                loaded = Some(lba);
            }
            let raw = u32::from_le_bytes([
                sector[offset],
                sector[offset + 1],
                sector[offset + 2],
                sector[offset + 3],
            ]);
            if raw & cluster_values::ENTRY_MASK == cluster_values::FREE {
                return Ok(Some(cluster));
            }
        }
        Ok(None)
    }

    /// Allocate `count` clusters as one chain and hang it off `tail`.
    ///
    /// `tail` is the last cluster of an existing chain, or 0 to start a new
    /// chain. Returns the first newly allocated cluster (0 if `count` is 0).
    pub fn allocate(&mut self, tail: u32, count: u32) -> FsResult<u32> {
        if count == 0 {
            return Ok(cluster_values::FREE);
        }
        if count > self.volume.free_cluster_count {
            return Err(FsError::InsufficientSpace);
        }

        let mut first = cluster_values::FREE;
        let mut previous = cluster_values::FREE;
        for _ in 0..count {
            let Some(cluster) = self.find_free_cluster_from(previous + 1)? else {
                // free counter was stale; undo what was taken so far
                warn!("free cluster count {} overstated", self.volume.free_cluster_count);
                if first != cluster_values::FREE {
                    self.release_chain(first)?;
                }
                return Err(FsError::InsufficientSpace);
            };
            self.write_entry(cluster, cluster_values::END_OF_CHAIN)?;
            if previous == cluster_values::FREE {
                first = cluster;
            } else {
                self.write_entry(previous, cluster)?;
            }
            self.volume.free_cluster_count -= 1;
            previous = cluster;
        }

        if tail != cluster_values::FREE {
            self.write_entry(tail, first)?;
        }
        self.volume.free_cluster_hint = previous;
        self.volume.persist_fs_info(&mut *self.disk)?;

        debug!(
            "allocated {} cluster(s) starting at {} after tail {}",
            count, first, tail
        );
        Ok(first)
    }

    /// Drop the trailing `remove` clusters of the chain at `head`.
    ///
    /// Returns the head afterwards, which is 0 when the whole chain went away.
    pub fn shrink(&mut self, head: u32, remove: u32) -> FsResult<u32> {
        if head == cluster_values::FREE || remove == 0 {
            return Ok(head);
        }
        let chain = self.chain(head)?;
        if remove as usize >= chain.len() {
            self.release_chain(head)?;
            return Ok(cluster_values::FREE);
        }

        let keep = chain.len() - remove as usize;
        self.write_entry(chain[keep - 1], cluster_values::END_OF_CHAIN)?;
        for &cluster in &chain[keep..] {
            self.write_entry(cluster, cluster_values::FREE)?;
        }
        self.volume.free_cluster_count += remove;
        self.volume.persist_fs_info(&mut *self.disk)?;

        debug!("shrunk chain at {} by {} cluster(s)", head, remove);
        Ok(head)
    }

    /// Grow (`delta > 0`) or shrink (`delta < 0`) the chain at `head`.
    ///
    /// A chain that does not exist yet (`head == 0`) is created by growth.
    /// Returns the resulting head.
    pub fn adjust_allocation(&mut self, head: u32, delta: i64) -> FsResult<u32> {
        if delta > 0 {
            let count = u32::try_from(delta).map_err(|_| FsError::InsufficientSpace)?;
            if head == cluster_values::FREE {
                return self.allocate(cluster_values::FREE, count);
            }
            let tail = self.chain_tail(head)?;
            self.allocate(tail, count)?;
            Ok(head)
        } else if delta < 0 {
            let count = u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX);
            self.shrink(head, count)
        } else {
            Ok(head)
        }
    }

    /// Follow one link, rejecting free, bad and out of range targets
    fn next_cluster(&mut self, cluster: u32) -> FsResult<Option<u32>> {
        let next = self.read_entry(cluster)?;
        if is_end_of_chain(next) {
            return Ok(None);
        }
        if next == cluster_values::BAD || !self.volume.is_data_cluster(next) {
            warn!("cluster {} links to invalid cluster {:#x}", cluster, next);
            return Err(FsError::CorruptChain);
        }
        Ok(Some(next))
    }

    /// All clusters of the chain starting at `head`, in order.
    ///
    /// A chain longer than the volume has clusters must contain a cycle and
    /// is reported as `CorruptChain`.
    pub fn chain(&mut self, head: u32) -> FsResult<Vec<u32>> {
        let mut clusters = Vec::new();
        if head == cluster_values::FREE {
            return Ok(clusters);
        }
        if !self.volume.is_data_cluster(head) {
            return Err(FsError::CorruptChain);
        }

        let mut current = head;
        loop {
            clusters.push(current);
            if clusters.len() > self.volume.cluster_count as usize {
                warn!("chain at {} does not terminate", head);
                return Err(FsError::CorruptChain);
            }
            match self.next_cluster(current)? {
                Some(next) => current = next,
                None => break,
            }
        }
        trace!("chain at {} has {} cluster(s)", head, clusters.len());
        Ok(clusters)
    }

    pub fn chain_length(&mut self, head: u32) -> FsResult<u32> {
        if head == cluster_values::FREE {
            return Ok(0);
        }
        if !self.volume.is_data_cluster(head) {
            return Err(FsError::CorruptChain);
        }

        let mut length = 0u32;
        let mut current = head;
        loop {
            length += 1;
            if length > self.volume.cluster_count {
                warn!("chain at {} does not terminate", head);
                return Err(FsError::CorruptChain);
            }
            match self.next_cluster(current)? {
                Some(next) => current = next,
                None => return Ok(length),
            }
        }
    }

    fn chain_tail(&mut self, head: u32) -> FsResult<u32> {
        let chain = self.chain(head)?;
        chain.last().copied().ok_or(FsError::CorruptChain)
    }

    /// Mark every cluster of the chain at `head` free. Returns how many were freed.
    pub fn release_chain(&mut self, head: u32) -> FsResult<u32> {
        let chain = self.chain(head)?;
        let freed = self.free_clusters(&chain)?;
        if freed > 0 {
            debug!("released {} cluster(s) starting at {}", freed, head);
        }
        Ok(freed)
    }

    /// Mark already validated clusters free and credit the free counter once
    pub(crate) fn free_clusters(&mut self, clusters: &[u32]) -> FsResult<u32> {
        for &cluster in clusters {
            self.write_entry(cluster, cluster_values::FREE)?;
        }
        if clusters.is_empty() {
            return Ok(0);
        }

        let freed = clusters.len() as u32;
        self.volume.free_cluster_count =
            (self.volume.free_cluster_count + freed).min(self.volume.cluster_count);
        self.volume.persist_fs_info(&mut *self.disk)?;
        Ok(freed)
    }

    /// Count free entries by scanning the first FAT copy
    pub fn count_free_clusters(&mut self) -> FsResult<u32> {
        let end = self.volume.cluster_count + 2;
        let mut sector = [0u8; SECTOR_SIZE];
        let mut free = 0u32;
        let mut cluster = 0u32;
        let mut lba = self.volume.fat_start_lba;

        while cluster < end {
            self.disk.read_sector(lba, &mut sector)?;
            for raw in sector.chunks_exact(4) {
                if cluster >= 2 && cluster < end {
                    let value = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    if value & cluster_values::ENTRY_MASK == cluster_values::FREE {
                        free += 1;
                    }
                }
                cluster += 1;
            }
            lba += 1;
        }
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::formatted_volume;

    #[test]
    fn allocate_links_new_chain_after_tail() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);

        let head = fs.allocate(0, 2).unwrap();
        assert_eq!(fs.chain_length(head).unwrap(), 2);

        let before = fs.volume.free_cluster_count;
        let tail = *fs.chain(head).unwrap().last().unwrap();
        fs.allocate(tail, 3).unwrap();

        let chain = fs.chain(head).unwrap();
        assert_eq!(chain.len(), 5);
        assert!(is_end_of_chain(fs.read_entry(chain[4]).unwrap()));
        assert_eq!(fs.volume.free_cluster_count, before - 3);
    }

    #[test]
    fn write_entry_mirrors_every_copy_and_keeps_top_bits() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let copies = vol.fat_copies as u64;
        let table = vol.table_size_sectors as u64;
        let fat_start = vol.fat_start_lba;

        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.write_entry(130, 0xF000_0000 | 0x1234).unwrap();
        let mut sector = [0u8; SECTOR_SIZE];
        fs.disk.read_sector(fat_start + 1, &mut sector).unwrap();
        sector[8..12].copy_from_slice(&0xA000_0000u32.to_le_bytes());
        fs.disk.write_sector(fat_start + 1, &sector).unwrap();

        fs.write_entry(130, 0x0000_0077).unwrap();
        assert_eq!(fs.read_entry(130).unwrap(), 0x77);

        let raw = disk.as_bytes();
        let first = (fat_start as usize + 1) * SECTOR_SIZE + 8;
        assert_eq!(
            u32::from_le_bytes(raw[first..first + 4].try_into().unwrap()),
            0xA000_0077
        );
        for copy in 1..copies {
            let off = ((fat_start + copy * table) as usize + 1) * SECTOR_SIZE + 8;
            assert_eq!(
                u32::from_le_bytes(raw[off..off + 4].try_into().unwrap()) & 0x0FFF_FFFF,
                0x77
            );
        }
    }

    #[test]
    fn shrink_frees_the_trailing_clusters() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        let head = fs.allocate(0, 4).unwrap();
        let chain = fs.chain(head).unwrap();
        let before = fs.volume.free_cluster_count;

        assert_eq!(fs.adjust_allocation(head, -3).unwrap(), head);
        assert_eq!(fs.chain_length(head).unwrap(), 1);
        for &c in &chain[1..] {
            assert_eq!(fs.read_entry(c).unwrap(), cluster_values::FREE);
        }
        assert_eq!(fs.volume.free_cluster_count, before + 3);

        assert_eq!(fs.adjust_allocation(head, -5).unwrap(), 0);
        assert_eq!(fs.read_entry(head).unwrap(), cluster_values::FREE);
        assert_eq!(fs.volume.free_cluster_count, before + 4);
    }

    #[test]
    fn cycle_is_reported_as_corrupt_chain() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        let head = fs.allocate(0, 2).unwrap();
        let second = fs.chain(head).unwrap()[1];
        fs.write_entry(second, head).unwrap();

        assert_eq!(fs.chain_length(head), Err(FsError::CorruptChain));
        assert_eq!(fs.chain(head), Err(FsError::CorruptChain));
    }

    #[test]
    fn link_to_free_cluster_is_corrupt() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        let head = fs.allocate(0, 1).unwrap();
        fs.write_entry(head, 0).unwrap();
        assert_eq!(fs.chain_length(head), Err(FsError::CorruptChain));
    }

    #[test]
    fn over_allocation_leaves_fat_untouched() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        let free = fs.volume.free_cluster_count;

        assert_eq!(fs.allocate(0, free + 1), Err(FsError::InsufficientSpace));
        assert_eq!(fs.volume.free_cluster_count, free);
        assert_eq!(fs.count_free_clusters().unwrap(), free);
    }

    #[test]
    fn stale_free_counter_rolls_back_partial_allocation() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        let real = fs.count_free_clusters().unwrap();
        fs.volume.free_cluster_count = real + 5;

        assert_eq!(fs.allocate(0, real + 2), Err(FsError::InsufficientSpace));
        assert_eq!(fs.count_free_clusters().unwrap(), real);
    }
}
