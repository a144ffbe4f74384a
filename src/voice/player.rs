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

//! The audio-domain half of a voice.
//!
//! `render` decodes, interpolates and envelopes one output frame per call.
//! It never touches storage and never blocks: a buffer that is not ready
//! simply yields silence and bumps the starvation counter.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::catalog::SampleDescriptor;
use crate::config::EnvelopeConfig;

use super::decode::Decoder;
use super::shared::{VoiceShared, BUFFER_CAPACITY};
use super::{adsr::Adsr, EndKind};

/// Frames in the pre-rendered fade tail of a stolen voice.
pub const FADE_FRAMES: usize = 16;

pub struct VoicePlayer {
    shared: Arc<VoiceShared>,
    output_rate: u32,
    descriptor: Option<Arc<SampleDescriptor>>,
    decoder: Decoder,
    /// Velocity-curve amplitude times the mapping gain, fixed at arm time.
    velocity_amp: f32,
    /// Base speed: descriptor speed times the native/output rate ratio.
    speed: f32,
    /// Fractional frame position within the play buffer.
    pos: f64,
    play_idx: usize,
    playing: bool,
    adsr: Adsr,
}

impl VoicePlayer {
    pub fn new(shared: Arc<VoiceShared>, output_rate: u32) -> Self {
        Self {
            shared,
            output_rate,
            descriptor: None,
            decoder: Decoder::Mono16,
            velocity_amp: 0.0,
            speed: 1.0,
            pos: 0.0,
            play_idx: 0,
            playing: false,
            adsr: Adsr::new(output_rate),
        }
    }

    /// Arms this half for a new note. The feed half must be armed with the
    /// same descriptor and epoch before any data appears; until then the
    /// voice renders silence.
    pub fn arm(
        &mut self,
        descriptor: Arc<SampleDescriptor>,
        envelope: EnvelopeConfig,
        velocity_amp: f32,
    ) {
        // Unsupported formats are rejected at catalog load; falling back to
        // mono 16-bit here keeps render total if one slips through.
        self.decoder =
            Decoder::select(descriptor.channels, descriptor.bits_per_sample)
                .unwrap_or(Decoder::Mono16);
        self.speed =
            descriptor.speed * descriptor.sample_rate as f32 / self.output_rate as f32;
        self.velocity_amp = velocity_amp;
        self.pos = 0.0;
        self.play_idx = 0;
        self.playing = true;
        self.adsr.configure(&envelope);
        self.adsr.retrigger(false);
        self.descriptor = Some(descriptor);
        // Any leftovers of a previous owner of this slot would otherwise be
        // rendered, or a stale `eof` would finish the voice before the feed
        // half ever arms. Rendering silence until fresh data arrives is the
        // contract.
        self.shared.bufs[0].mark_empty();
        self.shared.bufs[1].mark_empty();
        self.shared.eof.store(false, Ordering::Release);
        self.shared.buffers_played.store(0, Ordering::Relaxed);
        self.shared.active.store(true, Ordering::Release);
    }

    /// Renders one stereo frame. Total: always returns a frame, silence on
    /// starvation or when inactive. `speed_modifier` carries pitch bend.
    pub fn render(&mut self, speed_modifier: f32) -> (f32, f32) {
        if !self.playing {
            return (0.0, 0.0);
        }
        let frame_size = self.decoder.frame_size();

        loop {
            let buf = &self.shared.bufs[self.play_idx];
            if buf.is_empty() {
                let other = &self.shared.bufs[self.play_idx ^ 1];
                if self.shared.eof.load(Ordering::Acquire) {
                    if other.is_empty() {
                        self.finish();
                        return (0.0, 0.0);
                    }
                    // Final data landed in the other buffer.
                    self.play_idx ^= 1;
                    continue;
                }
                // The feeder has not caught up yet. Time still passes for
                // the envelope, so a voice released while its device is
                // stalled cannot hold the slot forever.
                let env = self.adsr.process();
                if self.adsr.is_idle() {
                    self.finish();
                    return (0.0, 0.0);
                }
                self.shared.set_amplitude(env);
                self.shared.starved_frames.fetch_add(1, Ordering::Relaxed);
                return (0.0, 0.0);
            }

            let bytes = buf.bytes();
            let frames = bytes.len() / frame_size;
            if frames == 0 {
                buf.mark_empty();
                continue;
            }

            let index = self.pos as usize;
            if index >= frames {
                // Drained: hand the buffer back and carry the exact
                // fractional remainder into the next one.
                buf.mark_empty();
                self.pos -= frames as f64;
                self.play_idx ^= 1;
                self.shared.buffers_played.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let (l0, r0) = self.decoder.decode(bytes, index);
            let (l1, r1) = if index + 1 < frames {
                self.decoder.decode(bytes, index + 1)
            } else {
                // The neighbour frame lives at the start of the other
                // buffer; hold the current frame if it is not there yet.
                let other = &self.shared.bufs[self.play_idx ^ 1];
                if !other.is_empty() && other.bytes().len() >= frame_size {
                    self.decoder.decode(other.bytes(), 0)
                } else {
                    (l0, r0)
                }
            };

            let env = self.adsr.process();
            if self.adsr.is_idle() {
                self.finish();
                return (0.0, 0.0);
            }
            self.shared.set_amplitude(env);

            let frac = (self.pos - index as f64) as f32;
            self.pos += (self.speed * speed_modifier) as f64;

            let amp = env * self.velocity_amp;
            return (
                (l0 + (l1 - l0) * frac) * amp,
                (r0 + (r1 - r0) * frac) * amp,
            );
        }
    }

    /// Recomputes the hunger scalar for the feed domain: unfilled buffer
    /// space in frames, scaled by the effective playback speed.
    pub fn update_hunger(&mut self, speed_modifier: f32) {
        if !self.playing {
            self.shared.hunger.store(0, Ordering::Relaxed);
            return;
        }
        let frame_size = self.decoder.frame_size();
        let frames_per_fill = (BUFFER_CAPACITY - BUFFER_CAPACITY % frame_size) / frame_size;

        let mut unfilled = 0usize;
        for buf in &self.shared.bufs {
            if buf.is_empty() {
                unfilled += frames_per_fill;
            }
        }
        // Frames already consumed from the play buffer count too.
        unfilled += (self.pos as usize).min(frames_per_fill);

        let scaled = unfilled as f32 * self.speed * speed_modifier;
        self.shared.hunger.store(scaled as u32, Ordering::Relaxed);
    }

    /// Transitions the envelope toward silence. `Now` silences immediately
    /// and deactivates; it is idempotent and is always paired with a
    /// pre-rendered fade tail by the pool.
    pub fn end(&mut self, kind: EndKind) {
        self.adsr.end(kind);
        if kind == EndKind::Now {
            self.finish();
        }
    }

    /// Pre-renders a short fade-out from the current state into `tail`
    /// (interleaved stereo, `2 * FADE_FRAMES` samples), then silences the
    /// voice. Called by the renderer before a stolen slot is re-armed.
    pub fn render_fade_tail(&mut self, tail: &mut [f32; FADE_FRAMES * 2]) {
        for frame in 0..FADE_FRAMES {
            let gain = 1.0 - (frame as f32 + 1.0) / FADE_FRAMES as f32;
            let (l, r) = self.render(1.0);
            tail[frame * 2] = l * gain;
            tail[frame * 2 + 1] = r * gain;
        }
        self.end(EndKind::Now);
    }

    fn finish(&mut self) {
        self.playing = false;
        self.shared.set_amplitude(0.0);
        self.shared.hunger.store(0, Ordering::Relaxed);
        self.shared.active.store(false, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}
