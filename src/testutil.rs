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

//! Shared test fixtures: synthetic FAT32 images and WAV byte builders.

pub mod fat;

/// Builds canonical RIFF/WAVE bytes from float samples, quantized to the
/// requested integer bit depth. 8-bit is stored unsigned with a 128 offset,
/// wider depths are signed little-endian, as in real PCM WAV files.
pub fn wav_bytes(channels: u16, bits: u16, sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    let bytes_per_sample = (bits / 8) as usize;
    let data_len = samples.len() * bytes_per_sample;
    let byte_rate = sample_rate * channels as u32 * bytes_per_sample as u32;
    let block_align = channels * bytes_per_sample as u16;

    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    for &s in samples {
        let s = s.clamp(-1.0, 1.0);
        match bits {
            8 => out.push(((s * 127.0) as i32 + 128) as u8),
            16 => out.extend_from_slice(&((s * 32767.0) as i16).to_le_bytes()),
            24 => {
                let v = (s * 8_388_607.0) as i32;
                out.extend_from_slice(&v.to_le_bytes()[..3]);
            }
            32 => out.extend_from_slice(&((s as f64 * 2_147_483_647.0) as i32).to_le_bytes()),
            other => panic!("unsupported bit depth in fixture: {}", other),
        }
    }
    out
}

/// A mono sine tone as float samples.
pub fn sine(freq: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// A mono ramp scaled into [-0.5, 0.5); handy for byte-accurate position
/// checks because consecutive frames are distinct.
pub fn ramp(frames: usize) -> Vec<f32> {
    (0..frames).map(|i| (i % 256) as f32 / 256.0 - 0.5).collect()
}

/// Counts rising zero crossings, used to verify pitch after interpolation.
pub fn zero_crossings(samples: &[f32]) -> usize {
    samples
        .windows(2)
        .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
        .count()
}
