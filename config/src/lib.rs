#![no_std]

const OS_NAME: &str = "WavOS";
const OS_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystem {
    Fat32,
}

pub struct Config {
    pub os_name: &'static str,
    pub os_version: &'static str,
    pub fs_type: FileSystem,
    /// Size of one device sector in bytes. The block shim only speaks 512-byte sectors.
    pub sector_size: usize,
    /// Primary partitions in an MBR
    pub max_partitions: usize,
    /// Nesting limit for recursive directory walks (rmdir, tree)
    pub max_directory_depth: usize,
    pub default_sectors_per_cluster: u8,
    pub default_fat_copies: u8,
    pub default_reserved_sectors: u16,
    pub shell_prompt: &'static str,
}

pub const CONFIG: Config = Config {
    os_name: OS_NAME,
    os_version: OS_VERSION,
    fs_type: FileSystem::Fat32,
    sector_size: 512,
    max_partitions: 4,
    max_directory_depth: 32,
    default_sectors_per_cluster: 1,
    default_fat_copies: 2,
    default_reserved_sectors: 32,
    shell_prompt: "> ",
};
