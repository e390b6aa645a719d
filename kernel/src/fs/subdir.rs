//! Creating and recursively deleting directories.

use alloc::vec::Vec;
use config::CONFIG;
use log::debug;

use super::disk::{BlockDevice, SECTOR_SIZE};
use super::entry::{Attributes, DIR_ENTRY_SIZE, DirEntry};
use super::error::{FsError, FsResult};
use super::fat32::Fat32FileSystem;
use super::name::validate_long_name;

impl<D: BlockDevice + ?Sized> Fat32FileSystem<'_, D> {
    /// Zero a fresh directory cluster and write its `.` and `..` entries
    fn seed_directory(&mut self, cluster: u32, parent: u32) -> FsResult<()> {
        let first_lba = self.volume.cluster_to_lba(cluster)?;
        let zero = [0u8; SECTOR_SIZE];
        for s in 1..self.volume.sectors_per_cluster as u64 {
            self.disk.write_sector(first_lba + s, &zero)?;
        }

        // the root is stored as cluster 0 in `..`
        let parent = if parent == self.volume.root_dir_cluster {
            0
        } else {
            parent
        };
        let mut sector = [0u8; SECTOR_SIZE];
        DirEntry::dot(cluster).write_to(&mut sector[..DIR_ENTRY_SIZE]);
        DirEntry::dot_dot(parent).write_to(&mut sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);
        self.disk.write_sector(first_lba, &sector)?;
        self.disk.flush()?;
        Ok(())
    }

    /// Create the directory `name` inside the directory at `parent`.
    ///
    /// Returns the first cluster of the new directory. If the parent has no
    /// room for the entry the cluster is given back.
    pub fn create_directory_in(&mut self, parent: u32, name: &str) -> FsResult<u32> {
        validate_long_name(name)?;
        if self.directory_depth(parent)? >= CONFIG.max_directory_depth {
            return Err(FsError::TooDeep);
        }
        if self.exists(parent, name)? {
            return Err(FsError::AlreadyExists);
        }

        let cluster = self.allocate(0, 1)?;
        let created = self
            .seed_directory(cluster, parent)
            .and_then(|_| self.insert(parent, name, Attributes::DIRECTORY, cluster, 0));
        if let Err(err) = created {
            self.release_chain(cluster)?;
            return Err(err);
        }

        debug!("created directory {:?} at cluster {}", name, cluster);
        Ok(cluster)
    }

    /// Release everything below the directory at `cluster`.
    ///
    /// The whole subtree is walked and every chain validated before the
    /// first cluster is freed, so a failure leaves the volume untouched.
    /// The directory's own chain and its entry in the parent are left for
    /// the caller. Returns the clusters of every directory that was emptied,
    /// `cluster` included.
    pub fn delete_directory_recursive(&mut self, cluster: u32) -> FsResult<Vec<u32>> {
        let mut emptied = Vec::new();
        let mut doomed = Vec::new();
        self.collect_subtree(cluster, 0, &mut emptied, &mut doomed)?;

        // a cluster reachable twice means two entries share a chain
        let mut sorted = doomed.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != doomed.len() {
            return Err(FsError::CorruptChain);
        }

        self.free_clusters(&doomed)?;
        debug!("released {} cluster(s) below directory {}", doomed.len(), cluster);
        Ok(emptied)
    }

    fn collect_subtree(
        &mut self,
        cluster: u32,
        depth: usize,
        emptied: &mut Vec<u32>,
        doomed: &mut Vec<u32>,
    ) -> FsResult<()> {
        if depth > CONFIG.max_directory_depth {
            return Err(FsError::TooDeep);
        }
        let root = self.volume.root_dir_cluster;

        for child in self.scan(cluster)? {
            if child.entry.is_dot_entry() {
                continue;
            }
            let first = child.entry.first_cluster;
            if child.entry.is_directory() {
                if first == 0 || first == cluster || first == root {
                    continue;
                }
                self.collect_subtree(first, depth + 1, emptied, doomed)?;
            }
            doomed.extend(self.chain(first)?);
        }

        emptied.push(cluster);
        Ok(())
    }
}
