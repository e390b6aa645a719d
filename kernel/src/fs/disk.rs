use alloc::vec;
use alloc::vec::Vec;
use config::CONFIG;

/// Bytes in one device sector
pub const SECTOR_SIZE: usize = CONFIG.sector_size;

/// Errors reported by a block device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// The LBA lies past the end of the device
    OutOfRange,
    /// More than one sector was handed to a single-sector transfer
    BufferTooLarge,
    /// The device reported a failure
    Io,
}

/// Sector-addressable storage the filesystem runs on.
///
/// Every transfer moves exactly one 512-byte sector on the device. A short
/// read buffer receives only the leading `buf.len()` bytes of the sector; a
/// short write buffer is zero-padded to a full sector. LBAs are absolute,
/// counted from the start of the physical device.
pub trait BlockDevice {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DiskError>;
    fn write_sector(&mut self, lba: u64, buf: &[u8]) -> Result<(), DiskError>;
    /// Commit any write cache to the medium
    fn flush(&mut self) -> Result<(), DiskError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        (**self).read_sector(lba, buf)
    }

    fn write_sector(&mut self, lba: u64, buf: &[u8]) -> Result<(), DiskError> {
        (**self).write_sector(lba, buf)
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        (**self).flush()
    }
}

/// Memory-backed block device
pub struct RamDisk {
    data: Vec<u8>,
    flushes: usize,
}

impl RamDisk {
    /// Create a zero-filled disk of `sectors` sectors
    pub fn new(sectors: u64) -> Self {
        RamDisk {
            data: vec![0u8; sectors as usize * SECTOR_SIZE],
            flushes: 0,
        }
    }

    /// Wrap an existing image. Trailing bytes that do not fill a sector are dropped.
    pub fn from_image(mut data: Vec<u8>) -> Self {
        let whole = data.len() - data.len() % SECTOR_SIZE;
        data.truncate(whole);
        RamDisk { data, flushes: 0 }
    }

    pub fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }

    /// Raw image contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of `flush` calls seen so far
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    fn sector_range(&self, lba: u64) -> Result<core::ops::Range<usize>, DiskError> {
        if lba >= self.sector_count() {
            return Err(DiskError::OutOfRange);
        }
        let start = lba as usize * SECTOR_SIZE;
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() > SECTOR_SIZE {
            return Err(DiskError::BufferTooLarge);
        }
        let range = self.sector_range(lba)?;
        let sector = &self.data[range];
        buf.copy_from_slice(&sector[..buf.len()]);
        Ok(())
    }

    fn write_sector(&mut self, lba: u64, buf: &[u8]) -> Result<(), DiskError> {
        if buf.len() > SECTOR_SIZE {
            return Err(DiskError::BufferTooLarge);
        }
        let range = self.sector_range(lba)?;
        let sector = &mut self.data[range];
        sector[..buf.len()].copy_from_slice(buf);
        sector[buf.len()..].fill(0);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DiskError> {
        self.flushes += 1;
        Ok(())
    }
}
