use core::fmt;

use super::disk::DiskError;

/// Everything a filesystem operation can report back to its caller.
///
/// None of these are fatal: the shell prints the message and keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// A path segment does not resolve to a directory
    InvalidPath,
    /// Create on a name that is already taken
    AlreadyExists,
    /// Delete/read/write on a missing name
    NotFound,
    /// No run of free slots long enough for a new entry
    DirectoryFull,
    /// Not enough free clusters for the requested growth
    InsufficientSpace,
    /// A cluster chain is cyclic, unterminated or points at a free/bad cluster
    CorruptChain,
    NotADirectory,
    IsADirectory,
    /// Directory nesting beyond `max_directory_depth`
    TooDeep,
    /// Empty, reserved or over-long name
    InvalidName,
    /// The boot sector does not describe a usable FAT32 volume
    InvalidVolume,
    /// The master boot record is missing its signature
    InvalidPartitionTable,
    /// No mounted partition with the requested index
    NoPartition,
    Disk(DiskError),
}

pub type FsResult<T> = Result<T, FsError>;

impl From<DiskError> for FsError {
    fn from(err: DiskError) -> Self {
        FsError::Disk(err)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::InvalidPath => f.write_str("invalid path"),
            FsError::AlreadyExists => f.write_str("already exists"),
            FsError::NotFound => f.write_str("not found"),
            FsError::DirectoryFull => f.write_str("directory full"),
            FsError::InsufficientSpace => f.write_str("insufficient space"),
            FsError::CorruptChain => f.write_str("corrupt cluster chain"),
            FsError::NotADirectory => f.write_str("not a directory"),
            FsError::IsADirectory => f.write_str("is a directory"),
            FsError::TooDeep => f.write_str("directory tree too deep"),
            FsError::InvalidName => f.write_str("invalid name"),
            FsError::InvalidVolume => f.write_str("not a usable FAT32 volume"),
            FsError::InvalidPartitionTable => f.write_str("illegal MBR"),
            FsError::NoPartition => f.write_str("no such partition"),
            FsError::Disk(DiskError::OutOfRange) => f.write_str("disk: sector out of range"),
            FsError::Disk(DiskError::BufferTooLarge) => f.write_str("disk: buffer too large"),
            FsError::Disk(DiskError::Io) => f.write_str("disk: I/O error"),
        }
    }
}
