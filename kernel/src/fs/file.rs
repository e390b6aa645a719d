//! File content: reading a chain out and rewriting or appending byte ranges.

use alloc::vec::Vec;
use log::debug;

use super::dir::FoundEntry;
use super::disk::{BlockDevice, SECTOR_SIZE};
use super::error::{FsError, FsResult};
use super::fat32::Fat32FileSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole content
    Rewrite,
    /// Add after the current end of the file
    Append,
}

impl<D: BlockDevice + ?Sized> Fat32FileSystem<'_, D> {
    /// Stream the first `size` bytes of the chain at `first_cluster` into `sink`.
    ///
    /// Stops early if the chain runs out before `size` bytes were produced.
    pub fn read(
        &mut self,
        first_cluster: u32,
        size: u32,
        sink: &mut dyn FnMut(&[u8]),
    ) -> FsResult<()> {
        let mut remaining = size as usize;
        if remaining == 0 {
            return Ok(());
        }

        let spc = self.volume.sectors_per_cluster as u64;
        let mut sector = [0u8; SECTOR_SIZE];
        for cluster in self.chain(first_cluster)? {
            let first_lba = self.volume.cluster_to_lba(cluster)?;
            for lba in first_lba..first_lba + spc {
                self.disk.read_sector(lba, &mut sector)?;
                let take = remaining.min(SECTOR_SIZE);
                sink(&sector[..take]);
                remaining -= take;
                if remaining == 0 {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn find_file(&mut self, dir_cluster: u32, name: &str) -> FsResult<FoundEntry> {
        let found = self
            .find_entry(dir_cluster, name)?
            .ok_or(FsError::NotFound)?;
        if found.entry.is_directory() {
            return Err(FsError::IsADirectory);
        }
        Ok(found)
    }

    /// Make the chain at `head` exactly big enough for `new_size` bytes.
    ///
    /// Growth is checked against the free counter before anything changes.
    fn fit_chain(&mut self, head: u32, new_size: u64) -> FsResult<u32> {
        let current = self.chain_length(head)? as i64;
        let needed = self.volume.clusters_for(new_size) as i64;
        let delta = needed - current;
        if delta > self.volume.free_cluster_count as i64 {
            return Err(FsError::InsufficientSpace);
        }
        self.adjust_allocation(head, delta)
    }

    /// Copy `data` into the chain at `head`, starting `offset` bytes in.
    ///
    /// Whole sectors are written outright. A sector only partly covered by
    /// `data` is read first so the bytes around the written range survive.
    fn write_at(&mut self, head: u32, offset: u64, data: &[u8]) -> FsResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let chain = self.chain(head)?;
        let spc = self.volume.sectors_per_cluster as u64;
        let mut sector = [0u8; SECTOR_SIZE];
        let mut written = 0usize;

        while written < data.len() {
            let position = offset + written as u64;
            let sector_index = position / SECTOR_SIZE as u64;
            let within = (position % SECTOR_SIZE as u64) as usize;
            let cluster = *chain
                .get((sector_index / spc) as usize)
                .ok_or(FsError::CorruptChain)?;
            let lba = self.volume.cluster_to_lba(cluster)? + sector_index % spc;
            let take = (SECTOR_SIZE - within).min(data.len() - written);

            if take == SECTOR_SIZE {
                self.disk.write_sector(lba, &data[written..written + SECTOR_SIZE])?;
            } else {
                self.disk.read_sector(lba, &mut sector)?;
                sector[within..within + take].copy_from_slice(&data[written..written + take]);
                self.disk.write_sector(lba, &sector)?;
            }
            written += take;
        }
        self.disk.flush()?;
        Ok(())
    }

    /// Replace the content of the file `name` with `data`.
    ///
    /// The chain is grown or shrunk first, then the directory entry gets its
    /// new size and first cluster, then the data is written.
    pub fn rewrite(&mut self, dir_cluster: u32, name: &str, data: &[u8]) -> FsResult<()> {
        let found = self.find_file(dir_cluster, name)?;
        let new_size = u32::try_from(data.len()).map_err(|_| FsError::InsufficientSpace)?;

        let head = self.fit_chain(found.entry.first_cluster, new_size as u64)?;
        let mut entry = found.entry;
        entry.first_cluster = head;
        entry.size = new_size;
        self.update_entry(found.location, &entry)?;

        self.write_at(head, 0, data)?;
        debug!("rewrote {:?}: {} bytes", name, new_size);
        Ok(())
    }

    /// Add `data` after the current end of the file `name`
    pub fn append(&mut self, dir_cluster: u32, name: &str, data: &[u8]) -> FsResult<()> {
        let found = self.find_file(dir_cluster, name)?;
        let old_size = found.entry.size as u64;
        let new_size = u32::try_from(old_size + data.len() as u64)
            .map_err(|_| FsError::InsufficientSpace)?;

        let head = self.fit_chain(found.entry.first_cluster, new_size as u64)?;
        let mut entry = found.entry;
        entry.first_cluster = head;
        entry.size = new_size;
        self.update_entry(found.location, &entry)?;

        self.write_at(head, old_size, data)?;
        debug!("appended {} bytes to {:?}, now {} bytes", data.len(), name, new_size);
        Ok(())
    }

    /// Whole content of the file `name` in the directory at `dir_cluster`
    pub fn read_to_vec(&mut self, dir_cluster: u32, name: &str) -> FsResult<Vec<u8>> {
        let found = self.find_file(dir_cluster, name)?;
        let mut content = Vec::with_capacity(found.entry.size as usize);
        self.read(found.entry.first_cluster, found.entry.size, &mut |chunk| {
            content.extend_from_slice(chunk)
        })?;
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::entry::Attributes;
    use crate::fs::fat::cluster_values;
    use crate::fs::testing::{formatted_volume, formatted_volume_with};
    use alloc::vec;

    #[test]
    fn rewrite_then_read_back() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.insert(root, "note.txt", Attributes::ARCHIVE, 0, 0).unwrap();

        fs.rewrite(root, "note.txt", b"hello world").unwrap();
        assert_eq!(fs.read_to_vec(root, "note.txt").unwrap(), b"hello world");

        let entry = fs.find_entry(root, "note.txt").unwrap().unwrap().entry;
        assert_eq!(entry.size, 11);
        assert_eq!(fs.chain_length(entry.first_cluster).unwrap(), 1);
    }

    #[test]
    fn rewrite_shrinks_chain_and_frees_clusters() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.insert(root, "big.bin", Attributes::ARCHIVE, 0, 0).unwrap();
        let free = fs.volume.free_cluster_count;

        let big: Vec<u8> = (0..3 * SECTOR_SIZE + 7).map(|i| i as u8).collect();
        fs.rewrite(root, "big.bin", &big).unwrap();
        assert_eq!(fs.volume.free_cluster_count, free - 4);
        assert_eq!(fs.read_to_vec(root, "big.bin").unwrap(), big);

        fs.rewrite(root, "big.bin", b"tiny").unwrap();
        assert_eq!(fs.volume.free_cluster_count, free - 1);
        assert_eq!(fs.read_to_vec(root, "big.bin").unwrap(), b"tiny");

        fs.rewrite(root, "big.bin", b"").unwrap();
        let entry = fs.find_entry(root, "big.bin").unwrap().unwrap().entry;
        assert_eq!(entry.first_cluster, cluster_values::FREE);
        assert_eq!(entry.size, 0);
        assert_eq!(fs.volume.free_cluster_count, free);
    }

    #[test]
    fn append_across_sector_boundary_keeps_prefix() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.insert(root, "log.txt", Attributes::ARCHIVE, 0, 0).unwrap();

        let first = vec![b'a'; 500];
        let second = vec![b'b'; 30];
        fs.append(root, "log.txt", &first).unwrap();
        fs.append(root, "log.txt", &second).unwrap();

        let content = fs.read_to_vec(root, "log.txt").unwrap();
        assert_eq!(content.len(), 530);
        assert!(content[..500].iter().all(|&b| b == b'a'));
        assert!(content[500..].iter().all(|&b| b == b'b'));
        let entry = fs.find_entry(root, "log.txt").unwrap().unwrap().entry;
        assert_eq!(fs.chain_length(entry.first_cluster).unwrap(), 2);
    }

    #[test]
    fn multi_sector_clusters_keep_offsets_straight() {
        let (mut disk, mut vol) = formatted_volume_with(8192, 4);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.insert(root, "data.bin", Attributes::ARCHIVE, 0, 0).unwrap();
        let free = fs.volume.free_cluster_count;

        // 2048-byte clusters; 3000 bytes end inside the second sector of cluster two
        let first: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        fs.rewrite(root, "data.bin", &first).unwrap();
        assert_eq!(fs.volume.free_cluster_count, free - 2);

        let second: Vec<u8> = (0..2500).map(|i| (i % 7) as u8 + 100).collect();
        fs.append(root, "data.bin", &second).unwrap();
        let mut expected = first.clone();
        expected.extend_from_slice(&second);
        assert_eq!(fs.read_to_vec(root, "data.bin").unwrap(), expected);

        let entry = fs.find_entry(root, "data.bin").unwrap().unwrap().entry;
        assert_eq!(entry.size, 5500);
        assert_eq!(fs.chain_length(entry.first_cluster).unwrap(), 3);
        assert_eq!(fs.volume.free_cluster_count, free - 3);

        fs.rewrite(root, "data.bin", &second[..2049]).unwrap();
        assert_eq!(fs.read_to_vec(root, "data.bin").unwrap(), &second[..2049]);
        assert_eq!(fs.volume.free_cluster_count, free - 2);
    }

    #[test]
    fn growth_beyond_free_space_leaves_file_unchanged() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.insert(root, "f.txt", Attributes::ARCHIVE, 0, 0).unwrap();
        fs.rewrite(root, "f.txt", b"keep me").unwrap();

        let too_big = vec![0u8; (fs.volume.free_cluster_count as usize + 2) * SECTOR_SIZE];
        assert_eq!(
            fs.append(root, "f.txt", &too_big),
            Err(FsError::InsufficientSpace)
        );
        let entry = fs.find_entry(root, "f.txt").unwrap().unwrap().entry;
        assert_eq!(entry.size, 7);
        assert_eq!(fs.read_to_vec(root, "f.txt").unwrap(), b"keep me");
    }

    #[test]
    fn read_stops_at_size() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.insert(root, "f.txt", Attributes::ARCHIVE, 0, 0).unwrap();
        fs.rewrite(root, "f.txt", &[7u8; 700]).unwrap();
        let head = fs.find_entry(root, "f.txt").unwrap().unwrap().entry.first_cluster;

        let mut chunks = Vec::new();
        fs.read(head, 600, &mut |chunk| chunks.push(chunk.len())).unwrap();
        assert_eq!(chunks, [512, 88]);
    }

    #[test]
    fn directories_cannot_be_written() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.create_directory_in(root, "docs").unwrap();

        assert_eq!(fs.rewrite(root, "docs", b"x"), Err(FsError::IsADirectory));
        assert_eq!(fs.append(root, "missing", b"x"), Err(FsError::NotFound));
    }
}
