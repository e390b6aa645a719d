//! Path splitting and resolution to directory clusters.

use alloc::string::String;
use alloc::vec::Vec;
use config::CONFIG;
use log::debug;

use super::disk::{BlockDevice, SECTOR_SIZE};
use super::entry::{DIR_ENTRY_SIZE, DirEntry};
use super::error::{FsError, FsResult};
use super::fat32::Fat32FileSystem;

/// Lazy iterator over the non-empty `/`-separated parts of a path
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while !self.rest.is_empty() {
            let (segment, rest) = match self.rest.find('/') {
                Some(i) => (&self.rest[..i], &self.rest[i + 1..]),
                None => (self.rest, ""),
            };
            self.rest = rest;
            if !segment.is_empty() {
                return Some(segment);
            }
        }
        None
    }
}

pub fn segments(path: &str) -> Segments<'_> {
    Segments { rest: path }
}

/// Textual form of `path` taken relative to `cwd`, with `.` and `..` folded away
pub fn normalize_path(cwd: &str, path: &str) -> String {
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        segments(cwd).collect()
    };

    for segment in segments(path) {
        match segment {
            "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    let mut normalized = String::from("/");
    normalized.push_str(&parts.join("/"));
    normalized
}

impl<D: BlockDevice + ?Sized> Fat32FileSystem<'_, D> {
    /// Parent of a directory, read from its `..` slot
    fn parent_of(&mut self, dir_cluster: u32) -> FsResult<u32> {
        let root = self.volume.root_dir_cluster;
        if dir_cluster == root {
            return Ok(root);
        }

        let mut sector = [0u8; SECTOR_SIZE];
        let lba = self.volume.cluster_to_lba(dir_cluster)?;
        self.disk.read_sector(lba, &mut sector)?;
        let dot_dot = DirEntry::parse(&sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);
        if &dot_dot.name[..2] != b".." || !dot_dot.is_directory() {
            return Err(FsError::InvalidPath);
        }
        // a parent of 0 means the root directory
        match dot_dot.first_cluster {
            0 => Ok(root),
            parent if self.volume.is_data_cluster(parent) => Ok(parent),
            _ => Err(FsError::CorruptChain),
        }
    }

    /// Number of `..` steps from the directory at `dir_cluster` up to the root
    pub(crate) fn directory_depth(&mut self, dir_cluster: u32) -> FsResult<usize> {
        let root = self.volume.root_dir_cluster;
        let mut depth = 0;
        let mut current = dir_cluster;
        while current != root {
            if depth >= CONFIG.max_directory_depth {
                return Err(FsError::TooDeep);
            }
            current = self.parent_of(current)?;
            depth += 1;
        }
        Ok(depth)
    }

    /// First cluster of the directory named by `path`.
    ///
    /// Absolute paths start at the root, anything else at the working
    /// directory. An empty path is the working directory itself.
    pub fn resolve(&mut self, path: &str) -> FsResult<u32> {
        let root = self.volume.root_dir_cluster;
        let mut cluster = if path.starts_with('/') {
            root
        } else {
            self.volume.cwd_cluster
        };

        for segment in segments(path) {
            cluster = match segment {
                "." => cluster,
                ".." => self.parent_of(cluster)?,
                name => {
                    let found = self
                        .find_entry(cluster, name)?
                        .filter(|found| found.entry.is_directory())
                        .ok_or(FsError::InvalidPath)?;
                    match found.entry.first_cluster {
                        0 => root,
                        first => first,
                    }
                }
            };
        }
        Ok(cluster)
    }

    pub fn change_working_directory(&mut self, path: &str) -> FsResult<()> {
        let cluster = self.resolve(path)?;
        let normalized = normalize_path(&self.volume.cwd_path, path);
        debug!("working directory {} (cluster {})", normalized, cluster);
        self.volume.cwd_cluster = cluster;
        self.volume.cwd_path = normalized;
        Ok(())
    }
}
