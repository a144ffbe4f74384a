// Copyright (C) 2026 the sdsampler authors
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Raw FAT32 directory record parsing: 8.3 short entries and the long file
//! name (LFN) records that precede them.

/// Size of one directory record on disk.
pub const DIR_ENTRY_SIZE: usize = 32;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_LABEL: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// One 32-byte directory record, decoded.
#[derive(Debug)]
pub enum DirRecord {
    /// First byte 0x00: no further entries in this directory.
    EndOfDirectory,
    /// Deleted or otherwise skippable record.
    Free,
    /// A long-name record carrying 13 UTF-16 units of the name.
    LongName {
        /// 1-based position of this chunk within the long name.
        sequence: u8,
        /// Set on the record stored first on disk (the highest sequence).
        is_last: bool,
        /// Checksum of the short name this chain belongs to.
        checksum: u8,
        units: [u16; 13],
    },
    /// A short (8.3) entry describing a file or directory.
    Short(ShortEntry),
}

#[derive(Debug, Clone)]
pub struct ShortEntry {
    /// Name decoded from the 8.3 field, dot inserted, as stored (uppercase).
    pub name: String,
    /// The raw 11-byte name field, kept for LFN checksum validation.
    pub raw_name: [u8; 11],
    pub attr: u8,
    pub first_cluster: u32,
    pub size: u32,
}

impl ShortEntry {
    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attr & ATTR_VOLUME_LABEL != 0
    }
}

/// Decodes one 32-byte record.
pub fn parse_record(raw: &[u8]) -> DirRecord {
    debug_assert_eq!(raw.len(), DIR_ENTRY_SIZE);
    match raw[0] {
        0x00 => return DirRecord::EndOfDirectory,
        0xE5 => return DirRecord::Free,
        _ => {}
    }
    let attr = raw[11];
    if attr == ATTR_LONG_NAME {
        let mut units = [0u16; 13];
        let mut n = 0;
        for off in (1..11).step_by(2) {
            units[n] = u16::from_le_bytes([raw[off], raw[off + 1]]);
            n += 1;
        }
        for off in (14..26).step_by(2) {
            units[n] = u16::from_le_bytes([raw[off], raw[off + 1]]);
            n += 1;
        }
        for off in (28..32).step_by(2) {
            units[n] = u16::from_le_bytes([raw[off], raw[off + 1]]);
            n += 1;
        }
        return DirRecord::LongName {
            sequence: raw[0] & 0x1F,
            is_last: raw[0] & 0x40 != 0,
            checksum: raw[13],
            units,
        };
    }

    let mut raw_name = [0u8; 11];
    raw_name.copy_from_slice(&raw[0..11]);
    let first_cluster =
        (u16::from_le_bytes([raw[20], raw[21]]) as u32) << 16 | u16::from_le_bytes([raw[26], raw[27]]) as u32;
    DirRecord::Short(ShortEntry {
        name: decode_short_name(&raw_name),
        raw_name,
        attr,
        first_cluster,
        size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
    })
}

/// Converts the fixed 8+3 name field into `NAME.EXT` form.
fn decode_short_name(raw: &[u8; 11]) -> String {
    let base: Vec<u8> = raw[0..8].iter().copied().take_while(|&b| b != b' ').collect();
    let ext: Vec<u8> = raw[8..11].iter().copied().take_while(|&b| b != b' ').collect();
    let mut name = String::from_utf8_lossy(&base).into_owned();
    if !ext.is_empty() {
        name.push('.');
        name.push_str(&String::from_utf8_lossy(&ext));
    }
    name
}

/// Checksum over the 11-byte short name, as stored in every LFN record of the
/// chain that precedes it.
pub fn lfn_checksum(raw_name: &[u8; 11]) -> u8 {
    raw_name
        .iter()
        .fold(0u8, |sum, &b| (sum >> 1).wrapping_add(sum << 7).wrapping_add(b))
}

/// Accumulates long-name records until the short entry that closes the chain
/// arrives. Records are stored by sequence number so the name assembles
/// correctly even though they appear on disk in reverse order.
#[derive(Default)]
pub struct LfnAccumulator {
    chunks: Vec<(u8, [u16; 13])>,
    checksum: Option<u8>,
}

impl LfnAccumulator {
    pub fn push(&mut self, sequence: u8, checksum: u8, units: [u16; 13]) {
        if self.checksum != Some(checksum) {
            // New chain (or a torn one); start over.
            self.chunks.clear();
            self.checksum = Some(checksum);
        }
        self.chunks.push((sequence, units));
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
        self.checksum = None;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Finishes the chain against the short entry that follows it. Returns
    /// the assembled long name, or `Err(())` when the stored checksum does
    /// not match the short name. Either way the accumulator is cleared.
    pub fn finish(&mut self, short_raw_name: &[u8; 11]) -> Result<Option<String>, ()> {
        if self.chunks.is_empty() {
            return Ok(None);
        }
        let expect = lfn_checksum(short_raw_name);
        let stored = self.checksum.take();
        let mut chunks = std::mem::take(&mut self.chunks);
        if stored != Some(expect) {
            return Err(());
        }
        chunks.sort_by_key(|(seq, _)| *seq);
        let mut units: Vec<u16> = Vec::with_capacity(chunks.len() * 13);
        for (_, chunk) in chunks {
            units.extend_from_slice(&chunk);
        }
        // The name is NUL terminated and padded with 0xFFFF to the record edge.
        let end = units.iter().position(|&u| u == 0x0000).unwrap_or(units.len());
        Ok(Some(String::from_utf16_lossy(&units[..end])))
    }
}
