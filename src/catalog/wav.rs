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

//! A chunk-scanning RIFF/WAVE header parser.
//!
//! Operates on the raw leading bytes of a file rather than a reader, since the
//! catalog only has sector data in hand. Anything other than integer PCM at
//! 8/16/24/32 bits, mono or stereo, is rejected per-file.

use thiserror::Error;

/// PCM format as declared by the `fmt ` chunk, plus the location of the
/// `data` chunk payload within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    /// Byte offset of the first PCM frame from the start of the file.
    pub data_offset: u64,
    /// Length of the PCM payload in bytes.
    pub data_len: u64,
}

impl WavInfo {
    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> u64 {
        self.channels as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// Total number of frames in the data chunk.
    pub fn frames(&self) -> u64 {
        self.data_len / self.frame_size()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("not a RIFF file")]
    NotRiff,
    #[error("RIFF form type is not WAVE")]
    NotWave,
    #[error("missing {0} chunk in scanned header bytes")]
    MissingChunk(&'static str),
    #[error("unsupported encoding (format tag {0}, only PCM is supported)")]
    UnsupportedEncoding(u16),
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u16),
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u16),
    #[error("header truncated at byte {0}")]
    Truncated(usize),
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, FormatError> {
    let b: [u8; 2] = bytes
        .get(at..at + 2)
        .ok_or(FormatError::Truncated(at))?
        .try_into()
        .unwrap();
    Ok(u16::from_le_bytes(b))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, FormatError> {
    let b: [u8; 4] = bytes
        .get(at..at + 4)
        .ok_or(FormatError::Truncated(at))?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(b))
}

/// Parses a WAV header from the leading bytes of a file.
///
/// `bytes` holds however much of the file start the caller read (a few
/// sectors is plenty for real-world headers); `file_size` is the full file
/// length, used to clamp a data chunk that claims more bytes than the file
/// has.
pub fn parse_header(bytes: &[u8], file_size: u64) -> Result<WavInfo, FormatError> {
    if bytes.len() < 12 {
        return Err(FormatError::Truncated(bytes.len()));
    }
    if &bytes[0..4] != b"RIFF" {
        return Err(FormatError::NotRiff);
    }
    if &bytes[8..12] != b"WAVE" {
        return Err(FormatError::NotWave);
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None;
    let mut offset = 12usize;

    // Walk chunks until the data chunk. Unknown chunks (LIST, fact, cue,
    // smpl) are skipped by their declared size.
    loop {
        if offset + 8 > bytes.len() {
            return Err(FormatError::MissingChunk("data"));
        }
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4)? as usize;
        let body = offset + 8;

        match id {
            b"fmt " => {
                let format_tag = read_u16(bytes, body)?;
                let channels = read_u16(bytes, body + 2)?;
                let sample_rate = read_u32(bytes, body + 4)?;
                let bits = read_u16(bytes, body + 14)?;
                fmt = Some((format_tag, channels, sample_rate, bits));
            }
            b"data" => {
                let (format_tag, channels, sample_rate, bits) =
                    fmt.ok_or(FormatError::MissingChunk("fmt "))?;
                if format_tag != 1 {
                    return Err(FormatError::UnsupportedEncoding(format_tag));
                }
                if !matches!(bits, 8 | 16 | 24 | 32) {
                    return Err(FormatError::UnsupportedBitDepth(bits));
                }
                if !matches!(channels, 1 | 2) {
                    return Err(FormatError::UnsupportedChannels(channels));
                }

                let data_offset = body as u64;
                let available = file_size.saturating_sub(data_offset);
                let data_len = (size as u64).min(available);
                let frame_size = channels as u64 * (bits as u64 / 8);
                return Ok(WavInfo {
                    channels,
                    bits_per_sample: bits,
                    sample_rate,
                    data_offset,
                    // Partial trailing frames are unplayable.
                    data_len: data_len - data_len % frame_size,
                });
            }
            _ => {}
        }

        // Chunks are word-aligned.
        offset = body + size + (size & 1);
    }
}
