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

//! A tiny FAT32 image builder for tests: MBR + BPB + one FAT + data region,
//! with long-name directory records generated the way real volumes store
//! them. Supports deliberate fragmentation so extent coalescing can be
//! exercised.

use std::collections::HashMap;

use crate::volume::dir::{lfn_checksum, ATTR_DIRECTORY, ATTR_LONG_NAME, DIR_ENTRY_SIZE};
use crate::volume::{MemBlockDevice, SECTOR_SIZE};

const PARTITION_START: u64 = 8;
const RESERVED_SECTORS: u32 = 4;
const SECTORS_PER_FAT: u32 = 16;
const ROOT_CLUSTER: u32 = 2;
const END_OF_CHAIN: u32 = 0x0FFF_FFFF;

struct DirBuf {
    first_cluster: u32,
    records: Vec<[u8; DIR_ENTRY_SIZE]>,
    used_sfns: Vec<[u8; 11]>,
}

pub struct ImageBuilder {
    sectors_per_cluster: u32,
    fat: Vec<u32>,
    clusters: HashMap<u32, Vec<u8>>,
    dirs: HashMap<String, DirBuf>,
    next_cluster: u32,
}

impl ImageBuilder {
    pub fn new(sectors_per_cluster: u32) -> Self {
        let mut fat = vec![0u32; SECTORS_PER_FAT as usize * SECTOR_SIZE / 4];
        fat[0] = 0x0FFF_FFF8;
        fat[1] = END_OF_CHAIN;
        fat[ROOT_CLUSTER as usize] = END_OF_CHAIN;
        let mut dirs = HashMap::new();
        dirs.insert(
            "/".to_string(),
            DirBuf {
                first_cluster: ROOT_CLUSTER,
                records: Vec::new(),
                used_sfns: Vec::new(),
            },
        );
        Self {
            sectors_per_cluster,
            fat,
            clusters: HashMap::new(),
            dirs,
            next_cluster: ROOT_CLUSTER + 1,
        }
    }

    fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    fn alloc(&mut self) -> u32 {
        let c = self.next_cluster;
        assert!((c as usize) < self.fat.len(), "test image FAT exhausted");
        self.next_cluster += 1;
        self.fat[c as usize] = END_OF_CHAIN;
        c
    }

    /// Writes `data` as a cluster chain, skipping `gap` clusters between
    /// consecutive allocations to force fragmentation.
    fn write_chain(&mut self, data: &[u8], gap: u32) -> u32 {
        let cluster_bytes = self.cluster_bytes();
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[][..]]
        } else {
            data.chunks(cluster_bytes).collect()
        };
        let mut first = 0u32;
        let mut prev = 0u32;
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                self.next_cluster += gap;
            }
            let c = self.alloc();
            self.clusters.insert(c, chunk.to_vec());
            if i == 0 {
                first = c;
            } else {
                self.fat[prev as usize] = c;
            }
            prev = c;
        }
        first
    }

    pub fn add_dir(&mut self, parent: &str, name: &str) {
        let cluster = self.alloc();
        let path = join(parent, name);
        self.push_entry(parent, name, ATTR_DIRECTORY, cluster, 0);
        self.dirs.insert(
            path,
            DirBuf {
                first_cluster: cluster,
                records: Vec::new(),
                used_sfns: Vec::new(),
            },
        );
    }

    pub fn add_file(&mut self, parent: &str, name: &str, data: &[u8]) {
        let first = self.write_chain(data, 0);
        self.push_entry(parent, name, 0x20, first, data.len() as u32);
    }

    pub fn add_fragmented_file(&mut self, parent: &str, name: &str, data: &[u8], gap: u32) {
        let first = self.write_chain(data, gap);
        self.push_entry(parent, name, 0x20, first, data.len() as u32);
    }

    fn push_entry(&mut self, parent: &str, name: &str, attr: u8, cluster: u32, size: u32) {
        let dir = self
            .dirs
            .get_mut(parent)
            .unwrap_or_else(|| panic!("unknown directory {}", parent));
        let sfn = make_sfn(name, &dir.used_sfns);
        dir.used_sfns.push(sfn);

        // Emit a long-name chain unless the name is already in plain
        // uppercase 8.3 form.
        if name != decode_sfn(&sfn) {
            let checksum = lfn_checksum(&sfn);
            let units: Vec<u16> = name.encode_utf16().collect();
            let n_records = units.len().div_ceil(13).max(1);
            for seq in (1..=n_records).rev() {
                let mut rec = [0u8; DIR_ENTRY_SIZE];
                rec[0] = seq as u8 | if seq == n_records { 0x40 } else { 0 };
                rec[11] = ATTR_LONG_NAME;
                rec[13] = checksum;
                let offsets: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
                for (k, &off) in offsets.iter().enumerate() {
                    let idx = (seq - 1) * 13 + k;
                    let unit: u16 = match idx.cmp(&units.len()) {
                        std::cmp::Ordering::Less => units[idx],
                        std::cmp::Ordering::Equal => 0x0000,
                        std::cmp::Ordering::Greater => 0xFFFF,
                    };
                    rec[off..off + 2].copy_from_slice(&unit.to_le_bytes());
                }
                dir.records.push(rec);
            }
        }

        let mut rec = [0u8; DIR_ENTRY_SIZE];
        rec[0..11].copy_from_slice(&sfn);
        rec[11] = attr;
        rec[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        rec[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        rec[28..32].copy_from_slice(&size.to_le_bytes());
        dir.records.push(rec);
    }

    /// Corrupts the checksum byte of every long-name record for `name` in
    /// `parent`, for exercising the checksum-mismatch path.
    pub fn corrupt_lfn_checksums(&mut self, parent: &str) {
        let dir = self.dirs.get_mut(parent).expect("unknown directory");
        for rec in dir.records.iter_mut() {
            if rec[11] == ATTR_LONG_NAME {
                rec[13] = rec[13].wrapping_add(1);
            }
        }
    }

    /// Assembles the image and wraps it in an in-memory block device.
    pub fn device(&mut self) -> MemBlockDevice {
        // Serialize directories into their cluster chains, extending chains
        // as needed.
        let dir_paths: Vec<String> = self.dirs.keys().cloned().collect();
        for path in dir_paths {
            let (first, bytes) = {
                let dir = &self.dirs[&path];
                let mut bytes = Vec::with_capacity(dir.records.len() * DIR_ENTRY_SIZE);
                for rec in &dir.records {
                    bytes.extend_from_slice(rec);
                }
                (dir.first_cluster, bytes)
            };
            let cluster_bytes = self.cluster_bytes();
            let mut cluster = first;
            let mut chunks = bytes.chunks(cluster_bytes).peekable();
            loop {
                let chunk = chunks.next().unwrap_or(&[]);
                self.clusters.insert(cluster, chunk.to_vec());
                if chunks.peek().is_none() {
                    self.fat[cluster as usize] = END_OF_CHAIN;
                    break;
                }
                let next = self.alloc();
                self.fat[cluster as usize] = next;
                cluster = next;
            }
        }

        let data_start = PARTITION_START + RESERVED_SECTORS as u64 + SECTORS_PER_FAT as u64;
        let data_sectors = (self.next_cluster as u64 - 2 + 1) * self.sectors_per_cluster as u64;
        let total_sectors = data_start + data_sectors;
        let mut image = vec![0u8; total_sectors as usize * SECTOR_SIZE];

        // MBR with a single FAT32 (LBA) partition.
        image[446 + 4] = 0x0C;
        image[446 + 8..446 + 12].copy_from_slice(&(PARTITION_START as u32).to_le_bytes());
        image[446 + 12..446 + 16]
            .copy_from_slice(&((total_sectors - PARTITION_START) as u32).to_le_bytes());
        image[510] = 0x55;
        image[511] = 0xAA;

        // Boot parameter block.
        let bpb = PARTITION_START as usize * SECTOR_SIZE;
        image[bpb + 11..bpb + 13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        image[bpb + 13] = self.sectors_per_cluster as u8;
        image[bpb + 14..bpb + 16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
        image[bpb + 16] = 1; // FAT copies
        image[bpb + 32..bpb + 36]
            .copy_from_slice(&((total_sectors - PARTITION_START) as u32).to_le_bytes());
        image[bpb + 36..bpb + 40].copy_from_slice(&SECTORS_PER_FAT.to_le_bytes());
        image[bpb + 44..bpb + 48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
        image[bpb + 510] = 0x55;
        image[bpb + 511] = 0xAA;

        // The FAT itself.
        let fat_off = (PARTITION_START as usize + RESERVED_SECTORS as usize) * SECTOR_SIZE;
        for (i, entry) in self.fat.iter().enumerate() {
            image[fat_off + i * 4..fat_off + i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
        }

        // Cluster data.
        for (&cluster, data) in &self.clusters {
            let off = (data_start as usize
                + (cluster as usize - 2) * self.sectors_per_cluster as usize)
                * SECTOR_SIZE;
            image[off..off + data.len()].copy_from_slice(data);
        }

        MemBlockDevice::new(image)
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn decode_sfn(sfn: &[u8; 11]) -> String {
    let base: Vec<u8> = sfn[0..8].iter().copied().take_while(|&b| b != b' ').collect();
    let ext: Vec<u8> = sfn[8..11].iter().copied().take_while(|&b| b != b' ').collect();
    let mut name = String::from_utf8_lossy(&base).into_owned();
    if !ext.is_empty() {
        name.push('.');
        name.push_str(&String::from_utf8_lossy(&ext));
    }
    name
}

/// Generates an 8.3 short name, mangling long names Windows-style
/// (`GRANDP~1WAV`) with a numeric tail kept unique per directory.
fn make_sfn(name: &str, used: &[[u8; 11]]) -> [u8; 11] {
    let (base, ext) = match name.rfind('.') {
        Some(i) => (&name[..i], &name[i + 1..]),
        None => (name, ""),
    };
    let clean = |s: &str, max: usize| -> Vec<u8> {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .map(|c| c.to_ascii_uppercase() as u8)
            .take(max)
            .collect()
    };
    let ext_part = clean(ext, 3);

    let fits_plain = {
        let base_ok = !base.is_empty()
            && base.len() <= 8
            && base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        let ext_ok = ext.len() <= 3 && ext.chars().all(|c| c.is_ascii_alphanumeric());
        base_ok && ext_ok && !name.contains(' ')
    };

    let mut sfn = [b' '; 11];
    if fits_plain {
        for (i, b) in clean(base, 8).iter().enumerate() {
            sfn[i] = *b;
        }
        for (i, b) in ext_part.iter().enumerate() {
            sfn[8 + i] = *b;
        }
        return sfn;
    }

    for tail in 1..=9u8 {
        let mut sfn = [b' '; 11];
        let stem = clean(base, 6);
        for (i, b) in stem.iter().enumerate() {
            sfn[i] = *b;
        }
        let tail_pos = stem.len().min(6);
        sfn[tail_pos] = b'~';
        sfn[tail_pos + 1] = b'0' + tail;
        for (i, b) in ext_part.iter().enumerate() {
            sfn[8 + i] = *b;
        }
        if !used.contains(&sfn) {
            return sfn;
        }
    }
    panic!("too many colliding short names in one test directory");
}
