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

//! PCM frame decoding. The variant is selected once when a voice is armed,
//! not dispatched per sample.

/// Decodes one interleaved PCM frame to a normalized stereo pair. Mono
/// sources are duplicated to both outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoder {
    Mono8,
    Mono16,
    Mono24,
    Mono32,
    Stereo8,
    Stereo16,
    Stereo24,
    Stereo32,
}

impl Decoder {
    /// Picks the decoder for a format, or `None` when unsupported.
    pub fn select(channels: u16, bits_per_sample: u16) -> Option<Decoder> {
        match (channels, bits_per_sample) {
            (1, 8) => Some(Decoder::Mono8),
            (1, 16) => Some(Decoder::Mono16),
            (1, 24) => Some(Decoder::Mono24),
            (1, 32) => Some(Decoder::Mono32),
            (2, 8) => Some(Decoder::Stereo8),
            (2, 16) => Some(Decoder::Stereo16),
            (2, 24) => Some(Decoder::Stereo24),
            (2, 32) => Some(Decoder::Stereo32),
            _ => None,
        }
    }

    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> usize {
        match self {
            Decoder::Mono8 => 1,
            Decoder::Mono16 | Decoder::Stereo8 => 2,
            Decoder::Mono24 => 3,
            Decoder::Mono32 | Decoder::Stereo16 => 4,
            Decoder::Stereo24 => 6,
            Decoder::Stereo32 => 8,
        }
    }

    /// Decodes frame `index` of `bytes` to a stereo pair in [-1, 1].
    #[inline]
    pub fn decode(&self, bytes: &[u8], index: usize) -> (f32, f32) {
        let at = index * self.frame_size();
        match self {
            Decoder::Mono8 => {
                let s = sample_u8(bytes[at]);
                (s, s)
            }
            Decoder::Mono16 => {
                let s = sample_i16(&bytes[at..]);
                (s, s)
            }
            Decoder::Mono24 => {
                let s = sample_i24(&bytes[at..]);
                (s, s)
            }
            Decoder::Mono32 => {
                let s = sample_i32(&bytes[at..]);
                (s, s)
            }
            Decoder::Stereo8 => (sample_u8(bytes[at]), sample_u8(bytes[at + 1])),
            Decoder::Stereo16 => (sample_i16(&bytes[at..]), sample_i16(&bytes[at + 2..])),
            Decoder::Stereo24 => (sample_i24(&bytes[at..]), sample_i24(&bytes[at + 3..])),
            Decoder::Stereo32 => (sample_i32(&bytes[at..]), sample_i32(&bytes[at + 4..])),
        }
    }
}

// WAV stores 8-bit PCM unsigned with a 128 midpoint; everything wider is
// signed little-endian.

#[inline]
fn sample_u8(byte: u8) -> f32 {
    (byte as f32 - 128.0) / 128.0
}

#[inline]
fn sample_i16(bytes: &[u8]) -> f32 {
    i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0
}

#[inline]
fn sample_i24(bytes: &[u8]) -> f32 {
    let raw = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
    raw as f32 / 8_388_608.0
}

#[inline]
fn sample_i32(bytes: &[u8]) -> f32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
}
