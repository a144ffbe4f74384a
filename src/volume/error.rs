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

/// Errors that make the whole volume unusable. A mount failure means no
/// playback is possible at all.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("missing 0x55AA boot signature in sector {0}")]
    BadSignature(u32),

    #[error("no FAT32 partition in the partition table")]
    NoFat32Partition,

    #[error("unsupported bytes per sector: {0}")]
    UnsupportedSectorSize(u16),

    #[error("invalid sectors per cluster: {0}")]
    BadSectorsPerCluster(u8),

    #[error("sector {sector} is beyond the end of the volume ({total} sectors)")]
    OutOfRange { sector: u64, total: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file errors. The catalog skips the offending file and keeps scanning;
/// these never abort an instrument load.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} is not a directory")]
    NotADirectory(String),

    #[error("long name checksum mismatch for short entry {0:?}")]
    LfnChecksum(String),

    #[error("cluster chain hit {kind} cluster {cluster:#010x}")]
    CorruptChain { cluster: u32, kind: &'static str },

    #[error(transparent)]
    Volume(#[from] VolumeError),
}
