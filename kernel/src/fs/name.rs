//! Conversion between display names and 8.3 short names plus VFAT long-name slots.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use super::entry::{LFN_CHARS_PER_ENTRY, LfnEntry, MAX_LFN_LENGTH, entry_status};
use super::error::{FsError, FsResult};

/// Characters allowed in a short name besides `A-Z` and `0-9`
const SHORT_NAME_SPECIALS: &[u8] = b"$%'-_@~!(){}^#&";

fn is_short_name_char(c: u8) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || SHORT_NAME_SPECIALS.contains(&c)
}

/// Split at the last dot, ignoring a dot in first position
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    }
}

fn short_chars(part: &str, limit: usize) -> Vec<u8> {
    part.bytes()
        .map(|b| b.to_ascii_uppercase())
        .filter(|&b| is_short_name_char(b))
        .take(limit)
        .collect()
}

/// Build the 11-byte short name for `long_name`.
///
/// `id` 0 gives the plain truncated form. Any other value replaces the end
/// of the base with a `~id` tail, so id 1 turns `a_very_long_filename.txt`
/// into `A_VERY~1TXT`.
pub fn generate_short_name(long_name: &str, id: u32) -> [u8; 11] {
    let (base, ext) = split_extension(long_name);
    let mut base = short_chars(base, 8);
    let ext = short_chars(ext, 3);

    if base.is_empty() {
        base.push(b'_');
    }

    if id > 0 {
        let tail = format!("~{}", id);
        let tail = tail.as_bytes();
        let pos = base.len().min(8usize.saturating_sub(tail.len()));
        base.truncate(pos);
        base.extend_from_slice(&tail[..tail.len().min(8 - pos)]);
    }

    let mut short = [b' '; 11];
    short[..base.len()].copy_from_slice(&base);
    short[8..8 + ext.len()].copy_from_slice(&ext);
    short
}

/// True when `name` is already a valid 8.3 name, ignoring case
pub fn fits_short_name(name: &str) -> bool {
    let (base, ext) = split_extension(name);
    let legal = |part: &str| part.bytes().all(|b| is_short_name_char(b.to_ascii_uppercase()));
    !base.is_empty()
        && base.len() <= 8
        && ext.len() <= 3
        && legal(base)
        && legal(ext)
        && name.bytes().filter(|&b| b == b'.').count() == usize::from(!ext.is_empty())
}

/// Standard VFAT checksum over the 11 short-name bytes
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &b| sum.rotate_right(1).wrapping_add(b))
}

/// Reject names that cannot be stored in a directory
pub fn validate_long_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidName);
    }
    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '\\' | '"' | '*' | ':' | '<' | '>' | '?' | '|'))
    {
        return Err(FsError::InvalidName);
    }
    if name.encode_utf16().count() > MAX_LFN_LENGTH {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

/// Split `name` into long-name slots paired with `short_name`.
///
/// The result is in logical order: sequence 1 first, the `LAST_ENTRY` bit on
/// the final element. On disk the slots are stored in the reverse order.
pub fn encode_long_name(name: &str, short_name: &[u8; 11]) -> FsResult<Vec<LfnEntry>> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.is_empty() || units.len() > MAX_LFN_LENGTH {
        return Err(FsError::InvalidName);
    }

    let checksum = lfn_checksum(short_name);
    let count = units.len().div_ceil(LFN_CHARS_PER_ENTRY);
    let mut entries = Vec::with_capacity(count);

    for (i, chunk) in units.chunks(LFN_CHARS_PER_ENTRY).enumerate() {
        let mut slot = [0xFFFFu16; LFN_CHARS_PER_ENTRY];
        slot[..chunk.len()].copy_from_slice(chunk);
        if chunk.len() < LFN_CHARS_PER_ENTRY {
            slot[chunk.len()] = 0x0000;
        }

        let mut order = (i + 1) as u8;
        if i + 1 == count {
            order |= LfnEntry::LAST_ENTRY;
        }
        entries.push(LfnEntry {
            order,
            checksum,
            units: slot,
        });
    }
    Ok(entries)
}

/// Reassemble a long name from slots given in on-disk order
pub fn decode_long_name(physical: &[LfnEntry]) -> String {
    let mut units = Vec::with_capacity(physical.len() * LFN_CHARS_PER_ENTRY);
    'slots: for entry in physical.iter().rev() {
        for &unit in &entry.units {
            match unit {
                0x0000 => break 'slots,
                0xFFFF => continue,
                u => units.push(u),
            }
        }
    }
    String::from_utf16_lossy(&units)
}

/// Render an 11-byte short name as `NAME.EXT`
pub fn short_name_to_string(short_name: &[u8; 11]) -> String {
    let mut base = short_name[..8].to_vec();
    if base[0] == entry_status::KANJI {
        base[0] = entry_status::DELETED;
    }
    let trim = |part: &[u8]| {
        let end = part.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
        String::from_utf8_lossy(&part[..end]).into_owned()
    };

    let base = trim(&base);
    let ext = trim(&short_name[8..]);
    if ext.is_empty() {
        base
    } else {
        format!("{}.{}", base, ext)
    }
}

/// Directory lookups ignore case, like every FAT implementation
pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
