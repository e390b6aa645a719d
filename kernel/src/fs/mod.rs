pub mod dir;
pub mod disk;
pub mod entry;
pub mod error;
pub mod fat;
pub mod fat32;
pub mod file;
pub mod format;
pub mod manager;
pub mod name;
pub mod partition;
pub mod path;
pub mod subdir;
pub mod volume;

pub use disk::{BlockDevice, DiskError, RamDisk};
pub use error::{FsError, FsResult};
pub use fat32::{Fat32FileSystem, FileEntry, FreeSpace, TreeEntry};
pub use file::WriteMode;
pub use manager::{Session, SharedSession};
pub use volume::VolumeDescriptor;

#[cfg(test)]
pub(crate) mod testing {
    use super::disk::RamDisk;
    use super::format::{FormatOptions, format_volume};
    use super::volume::{VolumeDescriptor, mount};

    /// Fresh single-sector-cluster volume at LBA 0 of a RAM disk
    pub fn formatted_volume(sectors: u64) -> (RamDisk, VolumeDescriptor) {
        formatted_volume_with(sectors, 1)
    }

    pub fn formatted_volume_with(sectors: u64, sectors_per_cluster: u8) -> (RamDisk, VolumeDescriptor) {
        let mut disk = RamDisk::new(sectors);
        let opts = FormatOptions {
            sectors_per_cluster,
            ..FormatOptions::default()
        };
        format_volume(&mut disk, 0, sectors as u32, &opts).unwrap();
        let volume = mount(&mut disk, 0).unwrap();
        (disk, volume)
    }
}
