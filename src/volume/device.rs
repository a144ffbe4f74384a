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

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::error::VolumeError;
use super::SECTOR_SIZE;

/// A read-only block device addressed in 512-byte sectors.
///
/// The volume reader is written against this seam so that tests can run
/// against in-memory images and production runs against disk image files
/// (or, behind a small shim, a raw device node).
pub trait BlockDevice {
    /// Reads `dst.len() / 512` whole sectors starting at `first_sector`.
    /// `dst` must be a multiple of the sector size.
    fn read_sectors(&mut self, first_sector: u64, dst: &mut [u8]) -> Result<(), VolumeError>;

    /// Total number of sectors on the device.
    fn sector_count(&self) -> u64;
}

/// A block device backed by an image file on the host filesystem.
pub struct FileBlockDevice {
    file: File,
    sectors: u64,
}

impl FileBlockDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sectors: len / SECTOR_SIZE as u64,
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_sectors(&mut self, first_sector: u64, dst: &mut [u8]) -> Result<(), VolumeError> {
        debug_assert_eq!(dst.len() % SECTOR_SIZE, 0);
        let wanted = (dst.len() / SECTOR_SIZE) as u64;
        if first_sector + wanted > self.sectors {
            return Err(VolumeError::OutOfRange {
                sector: first_sector + wanted - 1,
                total: self.sectors,
            });
        }
        self.file
            .seek(SeekFrom::Start(first_sector * SECTOR_SIZE as u64))?;
        self.file.read_exact(dst)?;
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sectors
    }
}

/// A block device over a byte vector, for tests that build images in memory.
#[cfg(test)]
pub struct MemBlockDevice {
    data: Vec<u8>,
}

#[cfg(test)]
impl MemBlockDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
impl BlockDevice for MemBlockDevice {
    fn read_sectors(&mut self, first_sector: u64, dst: &mut [u8]) -> Result<(), VolumeError> {
        debug_assert_eq!(dst.len() % SECTOR_SIZE, 0);
        let start = first_sector as usize * SECTOR_SIZE;
        let end = start + dst.len();
        if end > self.data.len() {
            return Err(VolumeError::OutOfRange {
                sector: (end / SECTOR_SIZE) as u64 - 1,
                total: self.sector_count(),
            });
        }
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        (self.data.len() / SECTOR_SIZE) as u64
    }
}
