//! Directory slot streams: scanning, lookup, insertion and removal.
//!
//! A directory is read straight off its cluster chain every time; nothing is
//! cached between calls. Long-name slots are collected as they stream past
//! and attached to the short entry that follows them.

use alloc::string::String;
use alloc::vec::Vec;
use core::ops::ControlFlow;
use log::{debug, trace};

use super::disk::{BlockDevice, SECTOR_SIZE};
use super::entry::{
    Attributes, DIR_ENTRY_SIZE, DirEntry, ENTRIES_PER_SECTOR, LfnEntry, entry_status, is_lfn_slot,
};
use super::error::{FsError, FsResult};
use super::fat32::Fat32FileSystem;
use super::name::{
    decode_long_name, encode_long_name, fits_short_name, generate_short_name, lfn_checksum,
    names_match, short_name_to_string, validate_long_name,
};

/// Highest `~N` tried before giving up on a unique short name
const MAX_SHORT_NAME_ID: u32 = 999_999;

/// Position of one 32-byte slot on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPos {
    pub lba: u64,
    pub index: usize,
}

/// A live directory entry together with its display name and slot positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundEntry {
    /// Long name if one is attached, otherwise the rendered short name
    pub name: String,
    pub entry: DirEntry,
    /// Slot of the short entry
    pub location: SlotPos,
    /// Slots of the long-name fragments, in on-disk order
    pub lfn_locations: Vec<SlotPos>,
}

impl FoundEntry {
    pub fn short_name(&self) -> String {
        short_name_to_string(&self.entry.name)
    }
}

fn slot(sector: &[u8], index: usize) -> &[u8] {
    &sector[index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE]
}

fn slot_mut(sector: &mut [u8], index: usize) -> &mut [u8] {
    &mut sector[index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE]
}

impl<D: BlockDevice + ?Sized> Fat32FileSystem<'_, D> {
    /// LBAs of every sector of the directory starting at `dir_cluster`, in stream order
    fn directory_sectors(&mut self, dir_cluster: u32) -> FsResult<Vec<u64>> {
        let spc = self.volume.sectors_per_cluster as u64;
        let clusters = self.chain(dir_cluster)?;
        let mut sectors = Vec::with_capacity(clusters.len() * spc as usize);
        for cluster in clusters {
            let first = self.volume.cluster_to_lba(cluster)?;
            sectors.extend((0..spc).map(|s| first + s));
        }
        Ok(sectors)
    }

    /// Call `f` for every live entry of the directory, stopping early on `Break`.
    ///
    /// A slot whose first byte is 0x00 ends the whole walk. Deleted slots and
    /// volume labels are skipped, and a deleted slot discards any pending long
    /// name. Long-name fragments whose checksum does not match the following
    /// short entry are ignored and the short name is reported instead.
    pub fn for_each_entry<F>(&mut self, dir_cluster: u32, mut f: F) -> FsResult<()>
    where
        F: FnMut(&FoundEntry) -> ControlFlow<()>,
    {
        let mut sector = [0u8; SECTOR_SIZE];
        let mut pending: Vec<LfnEntry> = Vec::new();
        let mut pending_slots: Vec<SlotPos> = Vec::new();

        for lba in self.directory_sectors(dir_cluster)? {
            self.disk.read_sector(lba, &mut sector)?;

            for index in 0..ENTRIES_PER_SECTOR {
                let raw = slot(&sector, index);
                match raw[0] {
                    entry_status::END_OF_DIRECTORY => return Ok(()),
                    entry_status::DELETED => {
                        pending.clear();
                        pending_slots.clear();
                        continue;
                    }
                    _ => {}
                }

                if is_lfn_slot(raw) {
                    let lfn = LfnEntry::parse(raw);
                    if lfn.is_last() {
                        pending.clear();
                        pending_slots.clear();
                    }
                    pending.push(lfn);
                    pending_slots.push(SlotPos { lba, index });
                    continue;
                }

                let entry = DirEntry::parse(raw);
                if entry.is_volume_label() {
                    pending.clear();
                    pending_slots.clear();
                    continue;
                }

                let checksum = lfn_checksum(&entry.name);
                let attached = !pending.is_empty() && pending.iter().all(|l| l.checksum == checksum);
                let found = if attached {
                    FoundEntry {
                        name: decode_long_name(&pending),
                        entry,
                        location: SlotPos { lba, index },
                        lfn_locations: core::mem::take(&mut pending_slots),
                    }
                } else {
                    if !pending.is_empty() {
                        trace!("orphaned long name before slot {} of LBA {}", index, lba);
                    }
                    FoundEntry {
                        name: short_name_to_string(&entry.name),
                        entry,
                        location: SlotPos { lba, index },
                        lfn_locations: Vec::new(),
                    }
                };
                pending.clear();
                pending_slots.clear();

                if f(&found).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Every live entry of the directory, `.` and `..` included
    pub fn scan(&mut self, dir_cluster: u32) -> FsResult<Vec<FoundEntry>> {
        let mut entries = Vec::new();
        self.for_each_entry(dir_cluster, |found| {
            entries.push(found.clone());
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }

    /// Look up `name` by long name or short name, ignoring case
    pub fn find_entry(&mut self, dir_cluster: u32, name: &str) -> FsResult<Option<FoundEntry>> {
        let mut result = None;
        self.for_each_entry(dir_cluster, |found| {
            if names_match(&found.name, name) || names_match(&found.short_name(), name) {
                result = Some(found.clone());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(result)
    }

    pub fn exists(&mut self, dir_cluster: u32, name: &str) -> FsResult<bool> {
        Ok(self.find_entry(dir_cluster, name)?.is_some())
    }

    /// Pick a short name for `name` that no entry of the directory uses yet
    fn unique_short_name(&mut self, dir_cluster: u32, name: &str) -> FsResult<[u8; 11]> {
        let mut taken: Vec<[u8; 11]> = Vec::new();
        self.for_each_entry(dir_cluster, |found| {
            taken.push(found.entry.name);
            ControlFlow::Continue(())
        })?;

        let first_id = if fits_short_name(name) { 0 } else { 1 };
        (first_id..=MAX_SHORT_NAME_ID)
            .map(|id| generate_short_name(name, id))
            .find(|candidate| !taken.contains(candidate))
            .ok_or(FsError::DirectoryFull)
    }

    /// First run of `needed` consecutive reusable slots in the directory.
    ///
    /// Runs may cross sector and cluster boundaries. Everything after the
    /// end-of-directory marker counts as free.
    fn find_free_run(&mut self, dir_cluster: u32, needed: usize) -> FsResult<Option<Vec<SlotPos>>> {
        let mut sector = [0u8; SECTOR_SIZE];
        let mut run: Vec<SlotPos> = Vec::with_capacity(needed);
        let mut past_end = false;

        for lba in self.directory_sectors(dir_cluster)? {
            if !past_end {
                self.disk.read_sector(lba, &mut sector)?;
            }
            for index in 0..ENTRIES_PER_SECTOR {
                let status = slot(&sector, index)[0];
                if status == entry_status::END_OF_DIRECTORY {
                    past_end = true;
                }
                if past_end || status == entry_status::DELETED {
                    run.push(SlotPos { lba, index });
                    if run.len() == needed {
                        return Ok(Some(run));
                    }
                } else {
                    run.clear();
                }
            }
        }
        Ok(None)
    }

    /// Apply `edit` to each listed slot, rewriting every touched sector once
    fn edit_slots<F>(&mut self, slots: &[SlotPos], mut edit: F) -> FsResult<()>
    where
        F: FnMut(usize, &mut [u8]),
    {
        let mut sector = [0u8; SECTOR_SIZE];
        let mut i = 0;
        while i < slots.len() {
            let lba = slots[i].lba;
            self.disk.read_sector(lba, &mut sector)?;
            while i < slots.len() && slots[i].lba == lba {
                edit(i, slot_mut(&mut sector, slots[i].index));
                i += 1;
            }
            self.disk.write_sector(lba, &sector)?;
        }
        self.disk.flush()?;
        Ok(())
    }

    /// Add an entry named `name` to the directory.
    ///
    /// Writes the long-name fragments followed by the short entry into the
    /// first run of free slots large enough for all of them. The directory is
    /// never grown; without such a run the call fails with `DirectoryFull`
    /// and nothing is written.
    pub fn insert(
        &mut self,
        dir_cluster: u32,
        name: &str,
        attributes: Attributes,
        first_cluster: u32,
        size: u32,
    ) -> FsResult<SlotPos> {
        validate_long_name(name)?;
        if self.exists(dir_cluster, name)? {
            return Err(FsError::AlreadyExists);
        }

        let short_name = self.unique_short_name(dir_cluster, name)?;
        let mut fragments = encode_long_name(name, &short_name)?;
        fragments.reverse();

        let slots = self
            .find_free_run(dir_cluster, fragments.len() + 1)?
            .ok_or(FsError::DirectoryFull)?;
        let entry = DirEntry::new(short_name, attributes, first_cluster, size);

        self.edit_slots(&slots, |i, raw| match fragments.get(i) {
            Some(fragment) => fragment.write_to(raw),
            None => entry.write_to(raw),
        })?;

        let location = slots[slots.len() - 1];
        debug!(
            "inserted {:?} ({}) into directory {} at LBA {} slot {}",
            name,
            short_name_to_string(&short_name),
            dir_cluster,
            location.lba,
            location.index
        );
        Ok(location)
    }

    /// Delete the entry named `name` and release its cluster chain.
    ///
    /// The long-name fragments and the short entry are marked deleted in
    /// place. Returns the entry as it was before removal.
    pub fn remove(&mut self, dir_cluster: u32, name: &str) -> FsResult<DirEntry> {
        let found = self
            .find_entry(dir_cluster, name)?
            .ok_or(FsError::NotFound)?;
        if found.entry.is_dot_entry() {
            return Err(FsError::InvalidName);
        }
        // refuse to touch anything if the chain cannot be walked
        self.chain(found.entry.first_cluster)?;

        let mut slots = found.lfn_locations.clone();
        slots.push(found.location);
        self.edit_slots(&slots, |_, raw| raw[0] = entry_status::DELETED)?;

        self.release_chain(found.entry.first_cluster)?;
        debug!("removed {:?} from directory {}", found.name, dir_cluster);
        Ok(found.entry)
    }

    /// Overwrite the short entry stored at `location`
    pub fn update_entry(&mut self, location: SlotPos, entry: &DirEntry) -> FsResult<()> {
        self.edit_slots(&[location], |_, raw| entry.write_to(raw))
    }
}
