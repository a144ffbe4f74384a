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

//! The sample catalog: loads an instrument folder from the volume into a
//! note and velocity-layer table of sample descriptors.
//!
//! Files that fail to resolve or parse are skipped with a warning; only a
//! missing or unparsable configuration aborts the load.

pub mod velocity;
pub mod wav;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EnvelopeConfig, InstrumentConfig, INSTRUMENT_FILE_NAME};
use crate::volume::{BlockDevice, Extent, ResolveError, Volume, SECTOR_SIZE};
use velocity::VelocityCurve;
use wav::FormatError;

/// How many leading sectors of a WAV file are read to locate its chunks.
const HEADER_SCAN_SECTORS: usize = 8;

/// The ratio between two pitches one semitone apart.
pub fn semitone_ratio(semitones: f32) -> f32 {
    2.0f32.powf(semitones / 12.0)
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read instrument configuration: {0}")]
    Configuration(#[from] ResolveError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("instrument configuration is not UTF-8")]
    ConfigEncoding,
    #[error("no playable samples in {0}")]
    NoSamples(String),
}

/// Everything a voice needs to stream and render one recording. Built at
/// load time, immutable afterwards, shared by reference with the voices
/// that play it.
#[derive(Debug, Clone)]
pub struct SampleDescriptor {
    /// File name, for diagnostics.
    pub name: String,
    /// Byte offset of the first PCM frame from the start of the file.
    pub data_offset: u64,
    /// PCM payload length in bytes, whole frames only.
    pub data_len: u64,
    /// Native sample rate of the recording.
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Playback speed multiplier from tuning and neighbour stretch; the
    /// native-rate to output-rate ratio is applied separately at arm time.
    pub speed: f32,
    /// Per-mapping gain.
    pub gain: f32,
    pub envelope: EnvelopeConfig,
    /// Loop region in frames, `start..end`.
    pub loop_region: Option<(u64, u64)>,
    /// The file's sector extents on the volume.
    pub extents: Arc<Vec<Extent>>,
}

impl SampleDescriptor {
    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> u64 {
        self.channels as u64 * (self.bits_per_sample as u64 / 8)
    }

    /// Total number of frames in the PCM payload.
    pub fn frames(&self) -> u64 {
        self.data_len / self.frame_size()
    }
}

/// The note/velocity-layer lookup table built from one instrument folder.
pub struct Catalog {
    title: String,
    curve: VelocityCurve,
    max_same_notes: usize,
    /// `layers[layer][note]`, 128 notes per layer.
    layers: Vec<Vec<Option<Arc<SampleDescriptor>>>>,
}

impl Catalog {
    /// Loads an instrument folder from the volume.
    pub fn load_instrument<D: BlockDevice>(
        volume: &mut Volume<D>,
        folder: &str,
    ) -> Result<Catalog, LoadError> {
        let config_path = format!("{}/{}", folder, INSTRUMENT_FILE_NAME);
        let config_entry = volume.resolve_entry(&config_path)?;
        let config_bytes = volume
            .read_file(&config_entry)
            .map_err(ResolveError::Volume)?;
        let config_text =
            String::from_utf8(config_bytes).map_err(|_| LoadError::ConfigEncoding)?;
        let config = InstrumentConfig::from_yaml(&config_text)?;

        let title = config
            .title
            .clone()
            .unwrap_or_else(|| folder.trim_matches('/').to_string());
        info!(
            instrument = title,
            mappings = config.mappings.len(),
            "Loading instrument"
        );

        let layer_count = config.layer_count();
        let mut layers: Vec<Vec<Option<Arc<SampleDescriptor>>>> =
            vec![vec![None; 128]; layer_count];
        let mut loaded = 0usize;

        for mapping in &config.mappings {
            let path = format!("{}/{}", folder, mapping.file);
            let descriptor = match load_descriptor(volume, &path, mapping, &config) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(file = mapping.file, error = %e, "Skipping sample");
                    continue;
                }
            };
            debug!(
                file = descriptor.name,
                note = mapping.note,
                layer = mapping.velocity_layer,
                frames = descriptor.frames(),
                extents = descriptor.extents.len(),
                "Sample mapped"
            );
            layers[mapping.velocity_layer][mapping.note as usize] = Some(Arc::new(descriptor));
            loaded += 1;
        }

        if loaded == 0 {
            return Err(LoadError::NoSamples(folder.to_string()));
        }

        let mut catalog = Catalog {
            title,
            curve: config.velocity_curve,
            max_same_notes: config.max_same_notes,
            layers,
        };
        catalog.stretch_neighbours(config.stretch);

        info!(
            instrument = catalog.title,
            samples = loaded,
            layers = layer_count,
            "Instrument loaded"
        );
        Ok(catalog)
    }

    /// Fills unmapped notes by borrowing the nearest directly mapped note
    /// within `stretch` semitones, adjusting the playback speed per semitone.
    /// The nearest note wins across every velocity layer; on a distance tie
    /// the note's own layer is preferred, so a close sample one layer over
    /// beats a distant one in the bucketed layer.
    fn stretch_neighbours(&mut self, stretch: u8) {
        let sources: Vec<(usize, usize, Arc<SampleDescriptor>)> = self
            .layers
            .iter()
            .enumerate()
            .flat_map(|(l, layer)| {
                layer
                    .iter()
                    .enumerate()
                    .filter_map(move |(n, d)| d.clone().map(|d| (l, n, d)))
            })
            .collect();
        if sources.is_empty() {
            return;
        }

        for layer_idx in 0..self.layers.len() {
            for note in 0..128usize {
                if self.layers[layer_idx][note].is_some() {
                    continue;
                }
                let (source_note, source) = sources
                    .iter()
                    .map(|(l, n, d)| {
                        let distance = (*n as i32 - note as i32).unsigned_abs();
                        ((distance, usize::from(*l != layer_idx), *l), *n, d)
                    })
                    .min_by_key(|(rank, _, _)| *rank)
                    .map(|(_, n, d)| (n, d))
                    .unwrap();
                let distance = note as i32 - source_note as i32;
                if distance.unsigned_abs() > stretch as u32 {
                    continue;
                }
                let mut stretched = (**source).clone();
                stretched.speed *= semitone_ratio(distance as f32);
                self.layers[layer_idx][note] = Some(Arc::new(stretched));
            }
        }
    }

    /// Finds the descriptor and amplitude for a note event. Falls back to
    /// lower layers when the bucketed layer has no sample for the note.
    pub fn lookup(&self, note: u8, vel: u8) -> Option<(Arc<SampleDescriptor>, f32)> {
        if note > 127 {
            return None;
        }
        let layer = velocity::layer_for(vel, self.layers.len());
        let descriptor = (0..=layer)
            .rev()
            .chain(layer + 1..self.layers.len())
            .find_map(|l| self.layers[l][note as usize].clone())?;
        let amplitude = self.curve.amplitude(vel) * descriptor.gain;
        Some((descriptor, amplitude))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn max_same_notes(&self) -> usize {
        self.max_same_notes
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let samples: usize = self
            .layers
            .iter()
            .map(|l| l.iter().filter(|s| s.is_some()).count())
            .sum();
        f.debug_struct("Catalog")
            .field("title", &self.title)
            .field("layers", &self.layers.len())
            .field("samples", &samples)
            .finish()
    }
}

fn load_descriptor<D: BlockDevice>(
    volume: &mut Volume<D>,
    path: &str,
    mapping: &crate::config::SampleMapping,
    config: &InstrumentConfig,
) -> Result<SampleDescriptor, DescriptorError> {
    let entry = volume.resolve_entry(path)?;
    if entry.is_dir {
        return Err(DescriptorError::IsADirectory);
    }

    let scan_len = (entry.size as usize).min(HEADER_SCAN_SECTORS * SECTOR_SIZE);
    let mut header = vec![0u8; scan_len];
    volume.read_range(&entry.extents, 0, &mut header)?;
    let info = wav::parse_header(&header, entry.size as u64)?;

    let loop_region = match mapping.loop_region {
        Some(region) => {
            if region.end > info.frames() {
                return Err(DescriptorError::LoopBeyondData {
                    end: region.end,
                    frames: info.frames(),
                });
            }
            Some((region.start, region.end))
        }
        None => None,
    };

    Ok(SampleDescriptor {
        name: mapping.file.clone(),
        data_offset: info.data_offset,
        data_len: info.data_len,
        sample_rate: info.sample_rate,
        channels: info.channels,
        bits_per_sample: info.bits_per_sample,
        speed: semitone_ratio(mapping.tune),
        gain: mapping.gain,
        envelope: mapping.envelope.unwrap_or(config.envelope),
        loop_region,
        extents: Arc::new(entry.extents),
    })
}

/// Per-file load failures; each skips one sample, never the load.
#[derive(Debug, Error)]
enum DescriptorError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Volume(#[from] crate::volume::VolumeError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("mapping points at a directory")]
    IsADirectory,
    #[error("loop end {end} beyond data ({frames} frames)")]
    LoopBeyondData { end: u64, frames: u64 },
}
