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

//! Instrument configuration.
//!
//! An instrument folder on the volume carries an `instrument.yaml` describing
//! which WAV file sounds which note, velocity layering, envelope defaults and
//! per-mapping overrides, and loop points. This module is pure data; the
//! catalog consumes the parsed form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::velocity::VelocityCurve;

/// The configuration file looked up inside an instrument folder.
pub const INSTRUMENT_FILE_NAME: &str = "instrument.yaml";

/// Default cap on voices simultaneously sounding the same note.
pub const DEFAULT_MAX_SAME_NOTES: usize = 2;

/// Default semitone distance over which unmapped notes borrow a neighbour's
/// sample with a speed adjustment.
pub const DEFAULT_STRETCH_SEMITONES: u8 = 12;

/// Upper bound on velocity layers. The catalog allocates 128 descriptor
/// slots per layer up front, so the layer index must stay small.
pub const MAX_VELOCITY_LAYERS: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse instrument configuration: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("invalid instrument configuration: {0}")]
    Invalid(String),
}

/// A YAML representation of an instrument.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct InstrumentConfig {
    /// Display name of the instrument.
    pub title: Option<String>,

    /// Envelope defaults applied to every mapping without an override.
    #[serde(default)]
    pub envelope: EnvelopeConfig,

    /// How velocity shapes amplitude.
    #[serde(default)]
    pub velocity_curve: VelocityCurve,

    /// Maximum voices sounding the same note at once.
    #[serde(default = "default_max_same_notes")]
    pub max_same_notes: usize,

    /// Semitone distance for borrowing a neighbouring note's sample.
    #[serde(default = "default_stretch")]
    pub stretch: u8,

    /// The note mappings.
    pub mappings: Vec<SampleMapping>,
}

fn default_max_same_notes() -> usize {
    DEFAULT_MAX_SAME_NOTES
}

fn default_stretch() -> u8 {
    DEFAULT_STRETCH_SEMITONES
}

/// Envelope segment times in seconds plus the sustain level.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct EnvelopeConfig {
    #[serde(default)]
    pub attack_time: f32,
    #[serde(default = "default_decay_time")]
    pub decay_time: f32,
    #[serde(default = "default_sustain_level")]
    pub sustain_level: f32,
    #[serde(default = "default_release_time")]
    pub release_time: f32,
}

fn default_decay_time() -> f32 {
    0.05
}

fn default_sustain_level() -> f32 {
    1.0
}

fn default_release_time() -> f32 {
    8.0
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack_time: 0.0,
            decay_time: default_decay_time(),
            sustain_level: default_sustain_level(),
            release_time: default_release_time(),
        }
    }
}

/// One file-to-note mapping.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SampleMapping {
    /// The WAV file name within the instrument folder.
    pub file: String,

    /// The MIDI note this recording sounds at its native rate.
    pub note: u8,

    /// Which velocity layer this recording belongs to (0 = softest).
    #[serde(default)]
    pub velocity_layer: usize,

    /// Fine tuning in semitones applied to the playback speed.
    #[serde(default)]
    pub tune: f32,

    /// Per-mapping gain multiplier.
    #[serde(default = "default_gain")]
    pub gain: f32,

    /// Optional loop region in frames.
    #[serde(rename = "loop")]
    pub loop_region: Option<LoopConfig>,

    /// Envelope override for this mapping.
    pub envelope: Option<EnvelopeConfig>,
}

fn default_gain() -> f32 {
    1.0
}

/// A loop region in frames; playback past `end` resumes at `start`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopConfig {
    pub start: u64,
    pub end: u64,
}

impl InstrumentConfig {
    /// Parses and validates an instrument configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: InstrumentConfig = serde_yml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mappings.is_empty() {
            return Err(ConfigError::Invalid("no mappings defined".to_string()));
        }
        for mapping in &self.mappings {
            if mapping.note > 127 {
                return Err(ConfigError::Invalid(format!(
                    "note {} out of MIDI range in mapping for {}",
                    mapping.note, mapping.file
                )));
            }
            if mapping.velocity_layer >= MAX_VELOCITY_LAYERS {
                return Err(ConfigError::Invalid(format!(
                    "velocity layer {} exceeds the maximum of {} in mapping for {}",
                    mapping.velocity_layer,
                    MAX_VELOCITY_LAYERS - 1,
                    mapping.file
                )));
            }
            if mapping.gain < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "negative gain in mapping for {}",
                    mapping.file
                )));
            }
            if let Some(region) = mapping.loop_region {
                if region.start >= region.end {
                    return Err(ConfigError::Invalid(format!(
                        "empty loop region {}..{} in mapping for {}",
                        region.start, region.end, mapping.file
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of velocity layers across all mappings.
    pub fn layer_count(&self) -> usize {
        self.mappings
            .iter()
            .map(|m| m.velocity_layer + 1)
            .max()
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = InstrumentConfig::from_yaml(
            r#"
mappings:
  - file: A4.wav
    note: 69
"#,
        )
        .unwrap();

        assert_eq!(config.mappings.len(), 1);
        assert_eq!(config.mappings[0].note, 69);
        assert_eq!(config.mappings[0].gain, 1.0);
        assert_eq!(config.max_same_notes, DEFAULT_MAX_SAME_NOTES);
        assert_eq!(config.envelope, EnvelopeConfig::default());
        assert_eq!(config.velocity_curve, VelocityCurve::Linear);
    }

    #[test]
    fn test_parse_full() {
        let config = InstrumentConfig::from_yaml(
            r#"
title: Grand Piano
velocity_curve: soft
max_same_notes: 3
stretch: 2
envelope:
  attack_time: 0.01
  decay_time: 4.0
  sustain_level: 0.0
  release_time: 0.5
mappings:
  - file: C4 soft.wav
    note: 60
    velocity_layer: 0
    gain: 0.9
  - file: C4 loud.wav
    note: 60
    velocity_layer: 1
    tune: -0.02
    loop:
      start: 1000
      end: 2000
"#,
        )
        .unwrap();

        assert_eq!(config.title.as_deref(), Some("Grand Piano"));
        assert_eq!(config.velocity_curve, VelocityCurve::Soft);
        assert_eq!(config.layer_count(), 2);
        let looped = &config.mappings[1];
        assert_eq!(
            looped.loop_region,
            Some(LoopConfig {
                start: 1000,
                end: 2000
            })
        );
        assert_eq!(looped.envelope, None);
        assert_eq!(config.envelope.sustain_level, 0.0);
    }

    #[test]
    fn test_rejects_empty_and_invalid() {
        assert!(InstrumentConfig::from_yaml("mappings: []").is_err());
        assert!(InstrumentConfig::from_yaml(
            r#"
mappings:
  - file: bad.wav
    note: 60
    loop:
      start: 500
      end: 500
"#
        )
        .is_err());
        assert!(InstrumentConfig::from_yaml("not yaml: [").is_err());
        // An absurd layer index would otherwise size the catalog table.
        assert!(InstrumentConfig::from_yaml(
            r#"
mappings:
  - file: bad.wav
    note: 60
    velocity_layer: 4000000000
"#
        )
        .is_err());
    }
}
