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

//! The playback engine.
//!
//! [`build`] wires three halves over channels: the [`Sampler`] is the
//! control surface (note events, pedal, pitch bend), the
//! [`renderer::Renderer`] runs in the audio callback, and the
//! [`feeder::Feeder`] streams sector data from a background thread. The
//! audio path communicates with the other domains only through per-voice
//! atomics and these channels.

pub mod allocator;
pub mod feeder;
pub mod renderer;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::{semitone_ratio, Catalog, SampleDescriptor};
use crate::config::EnvelopeConfig;
use crate::voice::{voice_pair, EndKind, VoiceShared};
use crate::volume::{BlockDevice, Volume};

pub use feeder::Feeder;
pub use renderer::Renderer;

/// Default size of the voice pool.
pub const MAX_POLYPHONY: usize = 18;

/// Control-to-audio commands.
pub enum RenderCommand {
    Arm {
        slot: usize,
        descriptor: Arc<SampleDescriptor>,
        envelope: EnvelopeConfig,
        amplitude: f32,
        epoch: u32,
    },
    End {
        slot: usize,
        kind: EndKind,
        epoch: u32,
    },
}

/// Audio-to-feeder commands.
pub enum FeedCommand {
    Arm {
        slot: usize,
        descriptor: Arc<SampleDescriptor>,
        epoch: u32,
    },
}

/// Engine-wide scalars shared across domains, single writer each: the
/// control domain writes the modifiers, the audio domain only reads.
pub struct EngineShared {
    speed_modifier: AtomicU32,
    master_gain: AtomicU32,
    pan: AtomicU32,
    voices: Vec<Arc<VoiceShared>>,
}

impl EngineShared {
    fn new(voices: Vec<Arc<VoiceShared>>) -> Self {
        Self {
            speed_modifier: AtomicU32::new(1.0f32.to_bits()),
            master_gain: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
            voices,
        }
    }

    pub fn speed_modifier(&self) -> f32 {
        f32::from_bits(self.speed_modifier.load(Ordering::Relaxed))
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    /// Stereo balance, -1 (hard left) to 1 (hard right).
    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    /// Total starved frames across the pool.
    pub fn starved_frames(&self) -> u64 {
        self.voices
            .iter()
            .map(|v| v.starved_frames.load(Ordering::Relaxed))
            .sum()
    }

    /// Voices the audio domain currently reports active.
    pub fn active_voices(&self) -> usize {
        self.voices
            .iter()
            .filter(|v| v.active.load(Ordering::Acquire))
            .count()
    }
}

/// Engine construction options.
pub struct EngineOptions {
    pub output_rate: u32,
    pub polyphony: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_rate: 44100,
            polyphony: MAX_POLYPHONY,
        }
    }
}

/// The control-domain surface of the engine.
pub struct Sampler {
    catalog: Arc<Catalog>,
    pool: RwLock<allocator::VoicePool>,
    /// Replaces every mapping's envelope while set.
    envelope_override: RwLock<Option<EnvelopeConfig>>,
    to_renderer: Sender<RenderCommand>,
    shared: Arc<EngineShared>,
}

impl Sampler {
    /// Starts a voice for a note event. A note with no sample, or no free
    /// or stealable slot, is dropped silently.
    pub fn note_on(&self, note: u8, velocity: u8) {
        let Some((descriptor, amplitude)) = self.catalog.lookup(note, velocity) else {
            debug!(note, "No sample mapped, note dropped");
            return;
        };

        let plan = {
            let mut pool = self.pool.write();
            pool.note_on(note)
        };
        let Some(plan) = plan else {
            return;
        };

        if let Some(release) = plan.same_note_release {
            let _ = self.to_renderer.try_send(RenderCommand::End {
                slot: release.slot,
                kind: release.kind,
                epoch: release.epoch,
            });
        }
        let envelope = self
            .envelope_override
            .read()
            .unwrap_or(descriptor.envelope);
        let send = self.to_renderer.try_send(RenderCommand::Arm {
            slot: plan.slot,
            descriptor,
            envelope,
            amplitude,
            epoch: plan.epoch,
        });
        if send.is_err() {
            // The slot would otherwise stay pending forever; the audio side
            // never learns about it.
            warn!(note, slot = plan.slot, "Arm command not delivered, note dropped");
            self.pool.write().abort(plan.slot, plan.epoch);
        }
    }

    /// Releases every pressed voice on `note` (deferred while the sustain
    /// pedal is down).
    pub fn note_off(&self, note: u8, kind: EndKind) {
        let releases = self.pool.write().note_off(note, kind);
        for release in releases {
            let _ = self.to_renderer.try_send(RenderCommand::End {
                slot: release.slot,
                kind: release.kind,
                epoch: release.epoch,
            });
        }
    }

    pub fn set_sustain(&self, sustain: bool) {
        let releases = self.pool.write().set_sustain(sustain);
        for release in releases {
            let _ = self.to_renderer.try_send(RenderCommand::End {
                slot: release.slot,
                kind: release.kind,
                epoch: release.epoch,
            });
        }
    }

    /// Pitch bend in semitones, applied as a speed modifier to every voice.
    pub fn set_pitch_bend(&self, semitones: f32) {
        self.shared
            .speed_modifier
            .store(semitone_ratio(semitones).to_bits(), Ordering::Relaxed);
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.shared
            .master_gain
            .store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Stereo balance, -1 (hard left) to 1 (hard right).
    pub fn set_pan(&self, pan: f32) {
        self.shared
            .pan
            .store(pan.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Overrides the envelope applied to notes started from now on; `None`
    /// restores the per-mapping envelopes. Already sounding voices keep the
    /// envelope they were armed with.
    pub fn set_envelope(&self, envelope: Option<EnvelopeConfig>) {
        *self.envelope_override.write() = envelope;
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Voices the control domain considers in use.
    pub fn in_use(&self) -> usize {
        self.pool.write().in_use()
    }

    pub fn steals(&self) -> u64 {
        self.pool.read().steals()
    }

    pub fn dropped_notes(&self) -> u64 {
        self.pool.read().dropped()
    }
}

/// Builds the three engine halves around a mounted volume and a loaded
/// catalog. The feeder takes ownership of the volume; nothing else touches
/// storage after this point.
pub fn build<D: BlockDevice>(
    volume: Volume<D>,
    catalog: Catalog,
    options: EngineOptions,
) -> (Sampler, Renderer, Feeder<D>) {
    let mut players = Vec::with_capacity(options.polyphony);
    let mut feeders = Vec::with_capacity(options.polyphony);
    let mut voice_shared = Vec::with_capacity(options.polyphony);

    for _ in 0..options.polyphony {
        let (player, voice_feeder) = voice_pair(options.output_rate);
        voice_shared.push(Arc::clone(voice_feeder.shared()));
        players.push(player);
        feeders.push(voice_feeder);
    }

    let shared = Arc::new(EngineShared::new(voice_shared.clone()));
    let (to_renderer, render_commands) = crossbeam_channel::bounded(256);
    let (to_feeder, feed_commands) = crossbeam_channel::bounded(256);

    let max_same_notes = catalog.max_same_notes();
    info!(
        instrument = catalog.title(),
        polyphony = options.polyphony,
        output_rate = options.output_rate,
        "Engine ready"
    );

    let sampler = Sampler {
        catalog: Arc::new(catalog),
        pool: RwLock::new(allocator::VoicePool::new(voice_shared, max_same_notes)),
        envelope_override: RwLock::new(None),
        to_renderer,
        shared: Arc::clone(&shared),
    };
    let renderer = Renderer::new(players, render_commands, to_feeder, Arc::clone(&shared));
    let feeder = Feeder::new(volume, feeders, feed_commands);

    (sampler, renderer, feeder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fat::ImageBuilder;
    use crate::testutil::{sine, wav_bytes};
    use crate::volume::MemBlockDevice;

    const RATE: u32 = 44100;

    fn engine(
        polyphony: usize,
    ) -> (Sampler, Renderer, Feeder<MemBlockDevice>) {
        let mut image = ImageBuilder::new(2);
        image.add_dir("/", "kit");
        image.add_file(
            "/kit",
            "instrument.yaml",
            br#"
max_same_notes: 2
stretch: 24
envelope:
  attack_time: 0.0
  decay_time: 10.0
  sustain_level: 1.0
  release_time: 0.05
mappings:
  - file: tone.wav
    note: 60
"#,
        );
        image.add_file(
            "/kit",
            "tone.wav",
            &wav_bytes(1, 16, RATE, &sine(440.0, RATE, 4 * RATE as usize)),
        );
        let mut volume = Volume::mount(image.device()).unwrap();
        let catalog = Catalog::load_instrument(&mut volume, "/kit").unwrap();
        build(
            volume,
            catalog,
            EngineOptions {
                output_rate: RATE,
                polyphony,
            },
        )
    }

    /// Renders blocks with the feeder driven in lockstep, like the offline
    /// render path does.
    fn run_blocks(
        renderer: &mut Renderer,
        feeder: &mut Feeder<MemBlockDevice>,
        blocks: usize,
    ) -> Vec<f32> {
        let mut out = Vec::new();
        let mut block = [0.0f32; 256];
        for _ in 0..blocks {
            renderer.render(&mut block);
            while feeder.service() {}
            out.extend_from_slice(&block);
        }
        out
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    #[test]
    fn test_note_on_becomes_audible_within_one_fill() {
        let (sampler, mut renderer, mut feeder) = engine(4);
        sampler.note_on(60, 100);

        let out = run_blocks(&mut renderer, &mut feeder, 4);
        assert!(peak(&out) > 0.01, "note should be audible");
        assert_eq!(sampler.in_use(), 1);
    }

    #[test]
    fn test_unmapped_note_is_dropped_silently() {
        let (sampler, mut renderer, mut feeder) = engine(4);
        sampler.note_on(10, 100);

        let out = run_blocks(&mut renderer, &mut feeder, 2);
        assert_eq!(peak(&out), 0.0);
        assert_eq!(sampler.in_use(), 0);
    }

    #[test]
    fn test_note_off_releases_to_silence() {
        let (sampler, mut renderer, mut feeder) = engine(4);
        sampler.note_on(60, 100);
        run_blocks(&mut renderer, &mut feeder, 8);

        sampler.note_off(60, EndKind::Regular);
        // 0.05s release: half a second later everything is silent again.
        let out = run_blocks(&mut renderer, &mut feeder, 180);
        let tail = &out[out.len() - 1024..];
        assert_eq!(peak(tail), 0.0);
        assert_eq!(sampler.in_use(), 0);
    }

    #[test]
    fn test_steal_at_full_polyphony() {
        let polyphony = 3;
        let (sampler, mut renderer, mut feeder) = engine(polyphony);

        // Fill the pool with distinct stretched notes.
        for note in [60u8, 62, 64] {
            sampler.note_on(note, 100);
            run_blocks(&mut renderer, &mut feeder, 30);
        }
        assert_eq!(sampler.in_use(), polyphony);
        assert_eq!(sampler.steals(), 0);

        // One more: exactly one voice is stolen, the pool stays full, and
        // the new note is audible.
        sampler.note_on(66, 100);
        let out = run_blocks(&mut renderer, &mut feeder, 8);
        assert_eq!(sampler.steals(), 1);
        assert_eq!(sampler.in_use(), polyphony);
        assert!(peak(&out) > 0.01);
    }

    #[test]
    fn test_same_note_cap() {
        let (sampler, mut renderer, mut feeder) = engine(8);

        // max_same_notes is 2; the third 60 releases the oldest one.
        for _ in 0..3 {
            sampler.note_on(60, 100);
            run_blocks(&mut renderer, &mut feeder, 10);
        }
        // No steal happened: the pool had room, the cap released instead.
        assert_eq!(sampler.steals(), 0);
        assert!(sampler.in_use() <= 3);
    }

    #[test]
    fn test_sustain_pedal_defers_release() {
        let (sampler, mut renderer, mut feeder) = engine(4);
        sampler.set_sustain(true);
        sampler.note_on(60, 100);
        run_blocks(&mut renderer, &mut feeder, 8);

        sampler.note_off(60, EndKind::Regular);
        let held = run_blocks(&mut renderer, &mut feeder, 8);
        assert!(peak(&held) > 0.01, "pedal must hold the note");

        sampler.set_sustain(false);
        let out = run_blocks(&mut renderer, &mut feeder, 180);
        let tail = &out[out.len() - 1024..];
        assert_eq!(peak(tail), 0.0);
    }

    #[test]
    fn test_envelope_override_applies_to_new_notes() {
        let (sampler, mut renderer, mut feeder) = engine(4);
        // The instrument's own 0.05s release would be silent well before
        // the window ends; the override stretches it far past it.
        sampler.set_envelope(Some(EnvelopeConfig {
            attack_time: 0.0,
            decay_time: 10.0,
            sustain_level: 1.0,
            release_time: 10.0,
        }));
        sampler.note_on(60, 100);
        run_blocks(&mut renderer, &mut feeder, 8);

        sampler.note_off(60, EndKind::Regular);
        let out = run_blocks(&mut renderer, &mut feeder, 180);
        let tail = &out[out.len() - 1024..];
        assert!(peak(tail) > 0.01, "overridden release should still sound");
    }

    #[test]
    fn test_pan_hard_left_keeps_right_silent() {
        let (sampler, mut renderer, mut feeder) = engine(1);
        sampler.set_pan(-1.0);
        sampler.note_on(60, 100);

        let out = run_blocks(&mut renderer, &mut feeder, 8);
        let left = out.chunks_exact(2).fold(0.0f32, |p, f| p.max(f[0].abs()));
        let right = out.chunks_exact(2).fold(0.0f32, |p, f| p.max(f[1].abs()));
        assert!(left > 0.01);
        assert_eq!(right, 0.0);
    }

    #[test]
    fn test_undeliverable_arm_frees_the_slot() {
        let (sampler, renderer, _feeder) = engine(2);
        // With the audio side gone the command channel rejects the arm;
        // the slot must not stay pending forever.
        drop(renderer);
        sampler.note_on(60, 100);
        assert_eq!(sampler.in_use(), 0);
    }

    #[test]
    fn test_pitch_bend_changes_rendered_frequency() {
        use crate::testutil::zero_crossings;

        let (sampler, mut renderer, mut feeder) = engine(1);
        sampler.set_pitch_bend(12.0);
        sampler.note_on(60, 127);

        // One second worth of 128-frame blocks.
        let out = run_blocks(&mut renderer, &mut feeder, RATE as usize / 128);
        let left: Vec<f32> = out.chunks_exact(2).map(|f| f[0]).collect();
        let measured = zero_crossings(&left) as f32;
        // An octave up: 440 Hz source renders near 880 Hz.
        assert!(
            (measured - 880.0).abs() < 30.0,
            "measured {} Hz",
            measured
        );
    }
}
