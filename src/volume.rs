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

//! Read-only FAT32 volume access tuned for streaming playback.
//!
//! Files are resolved once into an ordered list of contiguous sector runs
//! ([`Extent`]s) so that the per-buffer reads issued by the streaming voices
//! never have to walk the File Allocation Table. On an unfragmented volume a
//! whole file collapses into a single extent and every refill becomes one
//! large contiguous read.

pub mod device;
pub mod dir;
pub mod error;

use tracing::{debug, warn};

pub use device::{BlockDevice, FileBlockDevice};
#[cfg(test)]
pub use device::MemBlockDevice;
pub use error::{ResolveError, VolumeError};

use dir::{DirRecord, LfnAccumulator, ShortEntry, DIR_ENTRY_SIZE};

/// Sector size assumed throughout the engine.
pub const SECTOR_SIZE: usize = 512;

/// Sliding cache windows over the FAT and over directory data, in sectors.
const FAT_CACHE_SECTORS: usize = 8;
const DIR_CACHE_SECTORS: usize = 8;

/// Scratch used by [`Volume::read_range`], in sectors.
const SCRATCH_SECTORS: usize = 8;

/// FAT32 entry values (high 4 bits already masked off).
const CLUSTER_FREE: u32 = 0;
const CLUSTER_RESERVED: u32 = 1;
const CLUSTER_BAD: u32 = 0x0FFF_FFF7;
const CLUSTER_END_OF_CHAIN: u32 = 0x0FFF_FFF8;

/// MBR partition types that carry a FAT32 filesystem.
const FAT32_PARTITION_TYPES: [u8; 2] = [0x0B, 0x0C];

/// A contiguous run of sectors backing part of a file. Ordering within an
/// extent list is significant: it defines the byte-offset-to-sector mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub first: u64,
    pub last: u64,
}

impl Extent {
    pub fn sectors(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn bytes(&self) -> u64 {
        self.sectors() * SECTOR_SIZE as u64
    }
}

/// A resolved directory entry with its extent list built.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub is_dir: bool,
    pub first_cluster: u32,
    pub extents: Vec<Extent>,
    /// Set when the long-name chain preceding this entry failed its checksum
    /// and `name` fell back to the 8.3 form.
    pub(crate) lfn_mismatch: bool,
}

/// Filesystem parameters derived from the MBR and the boot parameter block.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub partition_start: u64,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    pub total_sectors: u64,
    /// First sector of the (first) FAT.
    pub fat_start: u64,
    /// First sector of the data region (cluster 2).
    pub data_start: u64,
}

/// A small sliding window of cached sectors, re-read only on a miss. One
/// instance covers the FAT, another covers directory data, so chain walking
/// and directory scanning do not evict each other.
struct SectorCache {
    first: u64,
    valid_sectors: usize,
    data: Vec<u8>,
}

impl SectorCache {
    fn new(window_sectors: usize) -> Self {
        Self {
            first: 0,
            valid_sectors: 0,
            data: vec![0u8; window_sectors * SECTOR_SIZE],
        }
    }

    /// Returns the cached bytes of `sector`, refilling the window from the
    /// device when the sector is outside it.
    fn sector<D: BlockDevice>(
        &mut self,
        device: &mut D,
        sector: u64,
    ) -> Result<&[u8], VolumeError> {
        let window = self.data.len() / SECTOR_SIZE;
        let hit = self.valid_sectors > 0
            && sector >= self.first
            && sector < self.first + self.valid_sectors as u64;
        if !hit {
            let available = device.sector_count().saturating_sub(sector);
            if available == 0 {
                return Err(VolumeError::OutOfRange {
                    sector,
                    total: device.sector_count(),
                });
            }
            let count = (window as u64).min(available) as usize;
            device.read_sectors(sector, &mut self.data[..count * SECTOR_SIZE])?;
            self.first = sector;
            self.valid_sectors = count;
        }
        let off = (sector - self.first) as usize * SECTOR_SIZE;
        Ok(&self.data[off..off + SECTOR_SIZE])
    }
}

/// A mounted read-only FAT32 volume.
pub struct Volume<D: BlockDevice> {
    device: D,
    geometry: Geometry,
    fat_cache: SectorCache,
    dir_cache: SectorCache,
    scratch: Vec<u8>,
}

impl<D: BlockDevice> Volume<D> {
    /// Mounts the volume: parses the MBR, picks the first FAT32 partition and
    /// reads its boot parameter block. Any failure here is fatal; no playback
    /// is possible without a mounted volume.
    pub fn mount(mut device: D) -> Result<Self, VolumeError> {
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sectors(0, &mut sector)?;
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(VolumeError::BadSignature(0));
        }

        // Partition table: four 16-byte entries starting at offset 446.
        let mut partition_start = None;
        for i in 0..4 {
            let entry = &sector[446 + i * 16..446 + (i + 1) * 16];
            let fs_type = entry[4];
            if FAT32_PARTITION_TYPES.contains(&fs_type) {
                partition_start =
                    Some(u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as u64);
                break;
            }
        }
        let partition_start = partition_start.ok_or(VolumeError::NoFat32Partition)?;

        device.read_sectors(partition_start, &mut sector)?;
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(VolumeError::BadSignature(partition_start as u32));
        }

        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(VolumeError::UnsupportedSectorSize(bytes_per_sector));
        }
        let sectors_per_cluster = sector[13];
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(VolumeError::BadSectorsPerCluster(sectors_per_cluster));
        }
        let reserved_sectors = u16::from_le_bytes([sector[14], sector[15]]) as u32;
        let fat_count = sector[16];
        let total_sectors =
            u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]) as u64;
        let sectors_per_fat =
            u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]);
        let root_cluster = u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]);

        let fat_start = partition_start + reserved_sectors as u64;
        let data_start = fat_start + fat_count as u64 * sectors_per_fat as u64;
        let geometry = Geometry {
            partition_start,
            sectors_per_cluster: sectors_per_cluster as u32,
            reserved_sectors,
            fat_count,
            sectors_per_fat,
            root_cluster,
            total_sectors,
            fat_start,
            data_start,
        };
        debug!(
            partition_start,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            sectors_per_fat,
            root_cluster,
            "Mounted FAT32 volume"
        );

        Ok(Self {
            device,
            geometry,
            fat_cache: SectorCache::new(FAT_CACHE_SECTORS),
            dir_cache: SectorCache::new(DIR_CACHE_SECTORS),
            scratch: vec![0u8; SCRATCH_SECTORS * SECTOR_SIZE],
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn first_sector_of_cluster(&self, cluster: u32) -> u64 {
        self.geometry.data_start
            + (cluster as u64 - 2) * self.geometry.sectors_per_cluster as u64
    }

    /// Resolves the FAT entry for `cluster` through the FAT cache. The high 4
    /// bits of a FAT32 entry are reserved and masked off.
    fn next_cluster(&mut self, cluster: u32) -> Result<u32, VolumeError> {
        let byte = self.geometry.fat_start * SECTOR_SIZE as u64 + cluster as u64 * 4;
        let sector = byte / SECTOR_SIZE as u64;
        let offset = (byte % SECTOR_SIZE as u64) as usize;
        let bytes = self.fat_cache.sector(&mut self.device, sector)?;
        let raw = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        Ok(raw & 0x0FFF_FFFF)
    }

    /// Walks the cluster chain starting at `first_cluster` and coalesces it
    /// into extents: consecutive clusters merge into one contiguous sector
    /// run. When `size` is known the final extent is trimmed so the list
    /// covers exactly `ceil(size / SECTOR_SIZE)` sectors.
    pub fn build_extents(
        &mut self,
        first_cluster: u32,
        size: Option<u64>,
    ) -> Result<Vec<Extent>, ResolveError> {
        if first_cluster < 2 {
            return Err(ResolveError::CorruptChain {
                cluster: first_cluster,
                kind: "free",
            });
        }
        let spc = self.geometry.sectors_per_cluster as u64;
        let max_clusters = self.geometry.sectors_per_fat as u64 * SECTOR_SIZE as u64 / 4;

        let mut extents = Vec::new();
        let mut cluster = first_cluster;
        let first = self.first_sector_of_cluster(cluster);
        let mut run = Extent {
            first,
            last: first + spc - 1,
        };
        let mut walked = 0u64;
        loop {
            walked += 1;
            if walked > max_clusters {
                return Err(ResolveError::CorruptChain {
                    cluster,
                    kind: "cyclic",
                });
            }
            let next = self.next_cluster(cluster)?;
            if next >= CLUSTER_END_OF_CHAIN {
                extents.push(run);
                break;
            }
            match next {
                CLUSTER_FREE => {
                    return Err(ResolveError::CorruptChain {
                        cluster: next,
                        kind: "free",
                    })
                }
                CLUSTER_RESERVED => {
                    return Err(ResolveError::CorruptChain {
                        cluster: next,
                        kind: "reserved",
                    })
                }
                CLUSTER_BAD => {
                    return Err(ResolveError::CorruptChain {
                        cluster: next,
                        kind: "bad",
                    })
                }
                _ => {}
            }
            if next == cluster + 1 {
                run.last += spc;
            } else {
                extents.push(run);
                let first = self.first_sector_of_cluster(next);
                run = Extent {
                    first,
                    last: first + spc - 1,
                };
            }
            cluster = next;
        }

        if let Some(size) = size {
            let needed = size.div_ceil(SECTOR_SIZE as u64);
            let mut total: u64 = extents.iter().map(Extent::sectors).sum();
            if total < needed {
                return Err(ResolveError::CorruptChain {
                    cluster: first_cluster,
                    kind: "short",
                });
            }
            while total > needed {
                let last = extents.last_mut().expect("extent list is non-empty");
                let excess = total - needed;
                if last.sectors() <= excess {
                    total -= last.sectors();
                    extents.pop();
                } else {
                    last.last -= excess;
                    total = needed;
                }
            }
        }
        Ok(extents)
    }

    /// Scans one directory cluster chain into short entries paired with their
    /// assembled long names.
    fn scan_directory(
        &mut self,
        first_cluster: u32,
    ) -> Result<Vec<(ShortEntry, Option<String>, bool)>, ResolveError> {
        let extents = self.build_extents(first_cluster, None)?;
        let mut out = Vec::new();
        let mut lfn = LfnAccumulator::default();
        let mut sector_buf = [0u8; SECTOR_SIZE];

        'sectors: for extent in &extents {
            for sector in extent.first..=extent.last {
                let bytes = self.dir_cache.sector(&mut self.device, sector)?;
                sector_buf.copy_from_slice(bytes);
                for record in sector_buf.chunks_exact(DIR_ENTRY_SIZE) {
                    match dir::parse_record(record) {
                        DirRecord::EndOfDirectory => break 'sectors,
                        DirRecord::Free => lfn.reset(),
                        DirRecord::LongName {
                            sequence,
                            checksum,
                            units,
                            ..
                        } => lfn.push(sequence, checksum, units),
                        DirRecord::Short(entry) => {
                            if entry.is_volume_label() {
                                lfn.reset();
                                continue;
                            }
                            match lfn.finish(&entry.raw_name) {
                                Ok(long_name) => out.push((entry, long_name, false)),
                                Err(()) => out.push((entry, None, true)),
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Lists a directory, building extents for every file in it. Entries
    /// whose long-name chain fails its checksum are kept under their 8.3
    /// name and logged; entries whose cluster chain is corrupt are skipped.
    pub fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, ResolveError> {
        let dir = self.resolve_entry(path)?;
        if !dir.is_dir {
            return Err(ResolveError::NotADirectory(path.to_string()));
        }
        let scanned = self.scan_directory(dir.first_cluster)?;
        let mut entries = Vec::with_capacity(scanned.len());
        for (short, long_name, mismatch) in scanned {
            if mismatch {
                warn!(
                    short_name = short.name,
                    "Long name checksum mismatch, falling back to 8.3 name"
                );
            }
            let is_dir = short.is_directory();
            let extents = if is_dir {
                Vec::new()
            } else {
                match self.build_extents(short.first_cluster, Some(short.size as u64)) {
                    Ok(extents) => extents,
                    Err(e) => {
                        warn!(name = short.name, error = %e, "Skipping entry with corrupt chain");
                        continue;
                    }
                }
            };
            entries.push(DirEntry {
                name: long_name.unwrap_or_else(|| short.name.clone()),
                size: short.size,
                is_dir,
                first_cluster: short.first_cluster,
                extents,
                lfn_mismatch: mismatch,
            });
        }
        Ok(entries)
    }

    /// Resolves `/`, `/name` or `/folder/name` to an entry with its extent
    /// list built. Name matching is case-insensitive, as on FAT itself.
    pub fn resolve_entry(&mut self, path: &str) -> Result<DirEntry, ResolveError> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let root_cluster = self.geometry.root_cluster;
        if components.is_empty() {
            return Ok(DirEntry {
                name: "/".to_string(),
                size: 0,
                is_dir: true,
                first_cluster: root_cluster,
                extents: Vec::new(),
                lfn_mismatch: false,
            });
        }

        let mut dir_cluster = root_cluster;
        for (i, component) in components.iter().enumerate() {
            let is_leaf = i == components.len() - 1;
            let found = self.find_in_dir(dir_cluster, component)?;
            if is_leaf {
                return Ok(found);
            }
            if !found.is_dir {
                return Err(ResolveError::NotADirectory(component.to_string()));
            }
            dir_cluster = found.first_cluster;
        }
        unreachable!("loop returns on the final component")
    }

    fn find_in_dir(&mut self, dir_cluster: u32, name: &str) -> Result<DirEntry, ResolveError> {
        let scanned = self.scan_directory(dir_cluster)?;
        for (short, long_name, mismatch) in scanned {
            let effective = long_name.as_deref().unwrap_or(&short.name);
            if effective.eq_ignore_ascii_case(name) || short.name.eq_ignore_ascii_case(name) {
                if mismatch {
                    return Err(ResolveError::LfnChecksum(short.name));
                }
                let is_dir = short.is_directory();
                let extents = if is_dir {
                    Vec::new()
                } else {
                    self.build_extents(short.first_cluster, Some(short.size as u64))?
                };
                return Ok(DirEntry {
                    name: effective.to_string(),
                    size: short.size,
                    is_dir,
                    first_cluster: short.first_cluster,
                    extents,
                    lfn_mismatch: false,
                });
            }
        }
        Err(ResolveError::NotFound(name.to_string()))
    }

    /// Reads `dst.len()` bytes starting at byte `offset` of the file backed
    /// by `extents`. Reads are issued as whole contiguous sector runs through
    /// a reused scratch buffer; nothing is allocated in the steady state.
    pub fn read_range(
        &mut self,
        extents: &[Extent],
        offset: u64,
        dst: &mut [u8],
    ) -> Result<(), VolumeError> {
        let mut written = 0usize;
        let mut skip = offset;
        for extent in extents {
            if skip >= extent.bytes() {
                skip -= extent.bytes();
                continue;
            }
            let mut sector = extent.first + skip / SECTOR_SIZE as u64;
            let mut in_sector = (skip % SECTOR_SIZE as u64) as usize;
            skip = 0;
            while written < dst.len() && sector <= extent.last {
                let run =
                    (SCRATCH_SECTORS as u64).min(extent.last - sector + 1) as usize;
                self.device
                    .read_sectors(sector, &mut self.scratch[..run * SECTOR_SIZE])?;
                let available = run * SECTOR_SIZE - in_sector;
                let take = available.min(dst.len() - written);
                dst[written..written + take]
                    .copy_from_slice(&self.scratch[in_sector..in_sector + take]);
                written += take;
                sector += run as u64;
                in_sector = 0;
            }
            if written == dst.len() {
                return Ok(());
            }
        }
        Err(VolumeError::OutOfRange {
            sector: extents.last().map(|e| e.last).unwrap_or(0),
            total: self.device.sector_count(),
        })
    }

    /// Reads a whole (small) file, such as an instrument configuration.
    pub fn read_file(&mut self, entry: &DirEntry) -> Result<Vec<u8>, VolumeError> {
        let mut data = vec![0u8; entry.size as usize];
        self.read_range(&entry.extents, 0, &mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fat::ImageBuilder;

    #[test]
    fn mount_rejects_missing_signature() {
        let device = MemBlockDevice::new(vec![0u8; 64 * SECTOR_SIZE]);
        match Volume::mount(device) {
            Err(VolumeError::BadSignature(0)) => {}
            other => panic!("unexpected mount result: {:?}", other.err()),
        }
    }

    #[test]
    fn unfragmented_file_resolves_to_single_extent() {
        let mut image = ImageBuilder::new(1);
        let data = vec![0xA5u8; 10 * SECTOR_SIZE];
        image.add_file("/", "tone.wav", &data);
        let mut volume = Volume::mount(image.device()).unwrap();

        let entry = volume.resolve_entry("/tone.wav").unwrap();
        assert_eq!(entry.size as usize, data.len());
        assert_eq!(entry.extents.len(), 1, "expected one coalesced extent");
        assert_eq!(entry.extents[0].sectors(), 10);
    }

    #[test]
    fn fragmented_file_produces_multiple_extents_covering_exactly() {
        let mut image = ImageBuilder::new(1);
        let data: Vec<u8> = (0..5 * SECTOR_SIZE + 100).map(|i| (i % 251) as u8).collect();
        image.add_fragmented_file("/", "frag.wav", &data, 2);
        let mut volume = Volume::mount(image.device()).unwrap();

        let entry = volume.resolve_entry("/frag.wav").unwrap();
        assert!(entry.extents.len() > 1, "file should be fragmented");
        let covered: u64 = entry.extents.iter().map(Extent::sectors).sum();
        assert_eq!(covered, (data.len() as u64).div_ceil(SECTOR_SIZE as u64));
        // No overlaps, strictly ordered.
        for pair in entry.extents.windows(2) {
            assert!(pair[0].last < pair[1].first);
        }
    }

    #[test]
    fn read_range_reassembles_fragmented_contents() {
        let mut image = ImageBuilder::new(1);
        let data: Vec<u8> = (0..4 * SECTOR_SIZE).map(|i| (i * 7 % 256) as u8).collect();
        image.add_fragmented_file("/", "frag.bin", &data, 1);
        let mut volume = Volume::mount(image.device()).unwrap();
        let entry = volume.resolve_entry("/frag.bin").unwrap();

        // Whole file.
        let all = volume.read_file(&entry).unwrap();
        assert_eq!(all, data);

        // Unaligned interior range spanning a fragment boundary.
        let mut chunk = vec![0u8; 700];
        volume.read_range(&entry.extents, 300, &mut chunk).unwrap();
        assert_eq!(chunk[..], data[300..1000]);
    }

    #[test]
    fn long_names_survive_the_round_trip() {
        let mut image = ImageBuilder::new(1);
        image.add_dir("/", "Grand Piano");
        image.add_file("/Grand Piano", "A4 velocity layer 3.wav", b"data");
        let mut volume = Volume::mount(image.device()).unwrap();

        let entries = volume.read_dir("/Grand Piano").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "A4 velocity layer 3.wav");

        // Case-insensitive resolution, as on FAT itself.
        let entry = volume
            .resolve_entry("/grand piano/a4 VELOCITY layer 3.WAV")
            .unwrap();
        assert_eq!(entry.size, 4);
    }

    #[test]
    fn checksum_mismatch_falls_back_to_short_name() {
        let mut image = ImageBuilder::new(1);
        image.add_file("/", "My Sample.wav", b"data");
        image.corrupt_lfn_checksums("/");
        let mut volume = Volume::mount(image.device()).unwrap();

        let entries = volume.read_dir("/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "MYSAMP~1.WAV");
        assert!(entries[0].lfn_mismatch);
    }

    #[test]
    fn missing_files_are_not_found() {
        let mut image = ImageBuilder::new(1);
        image.add_file("/", "kick.wav", b"x");
        let mut volume = Volume::mount(image.device()).unwrap();
        match volume.resolve_entry("/snare.wav") {
            Err(ResolveError::NotFound(name)) => assert_eq!(name, "snare.wav"),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn multi_cluster_geometry_counts_sectors() {
        // 4 sectors per cluster; a file of 9 sectors occupies 3 clusters but
        // the extent list must be trimmed to exactly ceil(size / 512).
        let mut image = ImageBuilder::new(4);
        let data = vec![1u8; 9 * SECTOR_SIZE];
        image.add_file("/", "pad.wav", &data);
        let mut volume = Volume::mount(image.device()).unwrap();

        let entry = volume.resolve_entry("/pad.wav").unwrap();
        let covered: u64 = entry.extents.iter().map(Extent::sectors).sum();
        assert_eq!(covered, 9);
    }
}
