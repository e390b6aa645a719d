use alloc::vec::Vec;
use spin::Mutex;

use crate::fs::disk::BlockDevice;
use crate::fs::error::{FsError, FsResult};
use crate::fs::fat32::Fat32FileSystem;
use crate::fs::partition::mount_partitions;
use crate::fs::volume::{VolumeDescriptor, mount};

/// A block device together with its mounted partitions and the one in use.
///
/// Everything a shell command needs is reached through the session, so there
/// is no global "current drive" state.
pub struct Session<D: BlockDevice> {
    disk: D,
    partitions: Vec<VolumeDescriptor>,
    current: usize,
}

impl<D: BlockDevice> Session<D> {
    /// Mount every FAT32 partition listed in the device's MBR and select the first
    pub fn open(mut disk: D) -> FsResult<Self> {
        let partitions = mount_partitions(&mut disk)?;
        if partitions.is_empty() {
            return Err(FsError::NoPartition);
        }
        Ok(Session {
            disk,
            partitions,
            current: 0,
        })
    }

    /// Mount a single volume at `partition_lba` without looking for an MBR
    pub fn from_volume(mut disk: D, partition_lba: u64) -> FsResult<Self> {
        let volume = mount(&mut disk, partition_lba)?;
        Ok(Session {
            disk,
            partitions: alloc::vec![volume],
            current: 0,
        })
    }

    pub fn partitions(&self) -> &[VolumeDescriptor] {
        &self.partitions
    }

    pub fn current_partition(&self) -> usize {
        self.current
    }

    pub fn select_partition(&mut self, index: usize) -> FsResult<()> {
        if index >= self.partitions.len() {
            return Err(FsError::NoPartition);
        }
        self.current = index;
        Ok(())
    }

    /// Filesystem handle for the selected partition
    pub fn fs(&mut self) -> Fat32FileSystem<'_, D> {
        Fat32FileSystem::new(&mut self.disk, &mut self.partitions[self.current])
    }

    pub fn volume(&self) -> &VolumeDescriptor {
        &self.partitions[self.current]
    }

    pub fn cwd_path(&self) -> &str {
        &self.volume().cwd_path
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    pub fn into_disk(self) -> D {
        self.disk
    }
}

/// Session behind a spinlock, for kernels where several tasks reach the filesystem
pub struct SharedSession<D: BlockDevice> {
    inner: Mutex<Session<D>>,
}

impl<D: BlockDevice> SharedSession<D> {
    pub const fn new(session: Session<D>) -> Self {
        SharedSession {
            inner: Mutex::new(session),
        }
    }

    /// Run `f` with exclusive access to the session
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session<D>) -> R) -> R {
        let mut session = self.inner.lock();
        f(&mut session)
    }

    pub fn into_inner(self) -> Session<D> {
        self.inner.into_inner()
    }
}
