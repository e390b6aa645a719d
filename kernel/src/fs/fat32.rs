//! Path-based filesystem operations over one mounted FAT32 volume.
//!
//! `Fat32FileSystem` borrows a block device and the descriptor of the
//! partition it operates on. The table, directory, path and content code
//! each add their own `impl` block to it; this module holds the entry points
//! the shell and the rest of the kernel call.

use alloc::string::String;
use alloc::vec::Vec;
use config::CONFIG;

use super::dir::FoundEntry;
use super::disk::BlockDevice;
use super::entry::Attributes;
use super::error::{FsError, FsResult};
use super::file::WriteMode;
use super::volume::VolumeDescriptor;

/// Represents a file or directory in the FAT32 filesystem
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u32,
    pub first_cluster: u32,

    pub creation_date: u16,
    pub creation_time: u16,
    pub last_access_date: u16,
    pub last_write_date: u16,
    pub last_write_time: u16,
}

impl From<&FoundEntry> for FileEntry {
    fn from(found: &FoundEntry) -> Self {
        FileEntry {
            name: found.name.clone(),
            is_directory: found.entry.is_directory(),
            size: found.entry.size,
            first_cluster: found.entry.first_cluster,
            creation_date: found.entry.create_date,
            creation_time: found.entry.create_time,
            last_access_date: found.entry.access_date,
            last_write_date: found.entry.write_date,
            last_write_time: found.entry.write_time,
        }
    }
}

/// One line of a recursive listing
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    /// 0 for direct children of the listed directory
    pub depth: usize,
    pub entry: FileEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpace {
    pub free_clusters: u32,
    pub total_clusters: u32,
    pub cluster_bytes: u32,
}

impl FreeSpace {
    pub fn free_bytes(&self) -> u64 {
        self.free_clusters as u64 * self.cluster_bytes as u64
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_clusters as u64 * self.cluster_bytes as u64
    }
}

/// FAT32 filesystem implementation
pub struct Fat32FileSystem<'a, D: BlockDevice + ?Sized> {
    pub(crate) disk: &'a mut D,
    pub(crate) volume: &'a mut VolumeDescriptor,
}

/// Split `path` into its directory part and final component
fn split_last(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None if path.starts_with('/') => ("/", trimmed),
        None => ("", trimmed),
    }
}

impl<'a, D: BlockDevice + ?Sized> Fat32FileSystem<'a, D> {
    pub fn new(disk: &'a mut D, volume: &'a mut VolumeDescriptor) -> Self {
        Fat32FileSystem { disk, volume }
    }

    pub fn volume(&self) -> &VolumeDescriptor {
        &*self.volume
    }

    fn lookup(&mut self, dir_path: &str, name: &str) -> FsResult<(u32, FoundEntry)> {
        let dir = self.resolve(dir_path)?;
        let found = self.find_entry(dir, name)?.ok_or(FsError::NotFound)?;
        Ok((dir, found))
    }

    /// Entries of the directory at `path`, without `.` and `..`
    pub fn read_directory(&mut self, path: &str) -> FsResult<Vec<FileEntry>> {
        let dir = self.resolve(path)?;
        Ok(self
            .scan(dir)?
            .iter()
            .filter(|found| !found.entry.is_dot_entry())
            .map(FileEntry::from)
            .collect())
    }

    /// Create an empty file `name` in the directory at `dir_path`
    pub fn create_file(&mut self, dir_path: &str, name: &str) -> FsResult<()> {
        let dir = self.resolve(dir_path)?;
        self.insert(dir, name, Attributes::ARCHIVE, 0, 0)?;
        Ok(())
    }

    pub fn delete_file(&mut self, dir_path: &str, name: &str) -> FsResult<()> {
        let (dir, found) = self.lookup(dir_path, name)?;
        if found.entry.is_directory() {
            return Err(FsError::IsADirectory);
        }
        self.remove(dir, name)?;
        Ok(())
    }

    pub fn create_directory(&mut self, dir_path: &str, name: &str) -> FsResult<()> {
        let dir = self.resolve(dir_path)?;
        self.create_directory_in(dir, name)?;
        Ok(())
    }

    /// Delete the directory `name` and everything below it.
    ///
    /// If the working directory was inside the deleted tree it falls back
    /// to the root.
    pub fn delete_directory(&mut self, dir_path: &str, name: &str) -> FsResult<()> {
        let (dir, found) = self.lookup(dir_path, name)?;
        if !found.entry.is_directory() {
            return Err(FsError::NotADirectory);
        }
        if found.entry.is_dot_entry() {
            return Err(FsError::InvalidName);
        }

        let target = found.entry.first_cluster;
        let root = self.volume.root_dir_cluster;
        let emptied = if target == 0 || target == root {
            Vec::new()
        } else {
            self.delete_directory_recursive(target)?
        };
        self.remove(dir, name)?;

        if emptied.contains(&self.volume.cwd_cluster) {
            self.volume.cwd_cluster = root;
            self.volume.cwd_path = String::from("/");
        }
        Ok(())
    }

    pub fn read_file(&mut self, dir_path: &str, name: &str) -> FsResult<Vec<u8>> {
        let dir = self.resolve(dir_path)?;
        self.read_to_vec(dir, name)
    }

    pub fn write_file(
        &mut self,
        dir_path: &str,
        name: &str,
        data: &[u8],
        mode: WriteMode,
    ) -> FsResult<()> {
        let dir = self.resolve(dir_path)?;
        match mode {
            WriteMode::Rewrite => self.rewrite(dir, name, data),
            WriteMode::Append => self.append(dir, name, data),
        }
    }

    /// True if `path` names a regular file
    pub fn file_exists(&mut self, path: &str) -> FsResult<bool> {
        let (dir_path, name) = split_last(path);
        if name.is_empty() {
            return Ok(false);
        }
        let dir = match self.resolve(dir_path) {
            Ok(dir) => dir,
            Err(FsError::InvalidPath) => return Ok(false),
            Err(err) => return Err(err),
        };
        Ok(self
            .find_entry(dir, name)?
            .is_some_and(|found| !found.entry.is_directory()))
    }

    /// True if `path` resolves to a directory
    pub fn directory_exists(&mut self, path: &str) -> FsResult<bool> {
        match self.resolve(path) {
            Ok(_) => Ok(true),
            Err(FsError::InvalidPath) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Recursive listing of the directory at `path`, parents before children
    pub fn tree(&mut self, path: &str) -> FsResult<Vec<TreeEntry>> {
        let dir = self.resolve(path)?;
        let mut lines = Vec::new();
        self.collect_tree(dir, 0, &mut lines)?;
        Ok(lines)
    }

    fn collect_tree(&mut self, dir: u32, depth: usize, lines: &mut Vec<TreeEntry>) -> FsResult<()> {
        if depth > CONFIG.max_directory_depth {
            return Err(FsError::TooDeep);
        }
        let root = self.volume.root_dir_cluster;

        for found in self.scan(dir)? {
            if found.entry.is_dot_entry() {
                continue;
            }
            let entry = FileEntry::from(&found);
            let child = entry.first_cluster;
            let descend = entry.is_directory && child != 0 && child != dir && child != root;
            lines.push(TreeEntry { depth, entry });
            if descend {
                self.collect_tree(child, depth + 1, lines)?;
            }
        }
        Ok(())
    }

    pub fn free_space(&self) -> FreeSpace {
        FreeSpace {
            free_clusters: self.volume.free_cluster_count,
            total_clusters: self.volume.cluster_count,
            cluster_bytes: self.volume.cluster_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::formatted_volume;

    #[test]
    fn split_last_handles_roots_and_relative_paths() {
        assert_eq!(split_last("a.txt"), ("", "a.txt"));
        assert_eq!(split_last("/a.txt"), ("/", "a.txt"));
        assert_eq!(split_last("docs/a.txt"), ("docs", "a.txt"));
        assert_eq!(split_last("/docs/sub/"), ("/docs", "sub"));
    }

    #[test]
    fn listing_hides_dot_entries() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.create_directory("", "docs").unwrap();
        fs.create_file("docs", "a.txt").unwrap();

        let names: Vec<String> = fs
            .read_directory("docs")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["a.txt"]);
    }

    #[test]
    fn delete_checks_entry_kind() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.create_directory("/", "docs").unwrap();
        fs.create_file("/", "a.txt").unwrap();

        assert_eq!(fs.delete_file("/", "docs"), Err(FsError::IsADirectory));
        assert_eq!(fs.delete_directory("/", "a.txt"), Err(FsError::NotADirectory));
        assert_eq!(fs.delete_file("/", "b.txt"), Err(FsError::NotFound));
        assert_eq!(fs.create_file("/missing", "x"), Err(FsError::InvalidPath));
    }

    #[test]
    fn exists_queries() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.create_directory("", "docs").unwrap();
        fs.create_file("docs", "a.txt").unwrap();

        assert!(fs.file_exists("/docs/a.txt").unwrap());
        assert!(!fs.file_exists("/docs").unwrap());
        assert!(!fs.file_exists("/nowhere/a.txt").unwrap());
        assert!(fs.directory_exists("docs").unwrap());
        assert!(fs.directory_exists("/").unwrap());
        assert!(!fs.directory_exists("docs/a.txt").unwrap());
    }

    #[test]
    fn deleting_the_working_directory_returns_to_root() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let root = vol.root_dir_cluster;
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.create_directory("", "docs").unwrap();
        fs.create_directory("docs", "inner").unwrap();
        fs.change_working_directory("/docs/inner").unwrap();

        fs.delete_directory("/", "docs").unwrap();
        assert_eq!(fs.volume().cwd_cluster, root);
        assert_eq!(fs.volume().cwd_path, "/");
    }

    #[test]
    fn tree_lists_depth_first() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        fs.create_directory("", "docs").unwrap();
        fs.create_file("docs", "a.txt").unwrap();
        fs.create_file("", "b.txt").unwrap();

        let lines: Vec<(usize, String)> = fs
            .tree("/")
            .unwrap()
            .into_iter()
            .map(|t| (t.depth, t.entry.name))
            .collect();
        assert_eq!(
            lines,
            [
                (0, String::from("docs")),
                (1, String::from("a.txt")),
                (0, String::from("b.txt")),
            ]
        );
    }

    #[test]
    fn deepest_tree_lists_and_deletes() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        let free = fs.free_space().free_clusters;

        fs.create_directory("/", "top").unwrap();
        fs.create_file("/top", "a.txt").unwrap();
        fs.write_file("/top", "a.txt", b"payload", WriteMode::Rewrite).unwrap();
        let mut path = String::from("/top");
        for _ in 1..CONFIG.max_directory_depth {
            fs.create_directory(&path, "d").unwrap();
            path.push_str("/d");
        }
        assert_eq!(fs.create_directory(&path, "d"), Err(FsError::TooDeep));

        let lines = fs.tree("/").unwrap();
        assert_eq!(lines.len(), CONFIG.max_directory_depth + 1);
        assert_eq!(lines.last().unwrap().depth, CONFIG.max_directory_depth - 1);

        fs.delete_directory("/", "top").unwrap();
        assert_eq!(fs.free_space().free_clusters, free);
        assert_eq!(fs.count_free_clusters().unwrap(), free);
    }

    #[test]
    fn free_space_follows_allocations() {
        let (mut disk, mut vol) = formatted_volume(4096);
        let mut fs = Fat32FileSystem::new(&mut disk, &mut vol);
        let before = fs.free_space();
        fs.create_file("", "a.txt").unwrap();
        fs.write_file("", "a.txt", &[0u8; 1025], WriteMode::Rewrite).unwrap();

        let after = fs.free_space();
        assert_eq!(after.free_clusters, before.free_clusters - 3);
        assert_eq!(after.free_bytes(), before.free_bytes() - 3 * 512);
        assert_eq!(after.total_clusters, before.total_clusters);
    }
}
