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

//! The audio-domain half of the engine.
//!
//! `render` is called from the output callback. It drains control commands
//! without blocking, mixes every voice into interleaved stereo, and updates
//! each voice's hunger for the feed thread. It performs no I/O and takes no
//! locks.

use crossbeam_channel::{Receiver, Sender};

use crate::voice::player::FADE_FRAMES;
use crate::voice::VoicePlayer;

use super::{EngineShared, FeedCommand, RenderCommand};
use std::sync::Arc;

/// A pre-rendered fade-out of a stolen voice, mixed on top of its
/// replacement so the cut is inaudible.
struct FadeTail {
    samples: [f32; FADE_FRAMES * 2],
    /// Next frame to mix; `FADE_FRAMES` means exhausted.
    pos: usize,
}

impl FadeTail {
    fn new() -> Self {
        Self {
            samples: [0.0; FADE_FRAMES * 2],
            pos: FADE_FRAMES,
        }
    }

    fn next_frame(&mut self) -> (f32, f32) {
        if self.pos >= FADE_FRAMES {
            return (0.0, 0.0);
        }
        let frame = (self.samples[self.pos * 2], self.samples[self.pos * 2 + 1]);
        self.pos += 1;
        frame
    }
}

pub struct Renderer {
    players: Vec<VoicePlayer>,
    tails: Vec<FadeTail>,
    /// Epoch each slot was last armed with; gates stale release commands.
    epochs: Vec<u32>,
    commands: Receiver<RenderCommand>,
    to_feeder: Sender<FeedCommand>,
    shared: Arc<EngineShared>,
}

impl Renderer {
    pub(super) fn new(
        players: Vec<VoicePlayer>,
        commands: Receiver<RenderCommand>,
        to_feeder: Sender<FeedCommand>,
        shared: Arc<EngineShared>,
    ) -> Self {
        let tails = players.iter().map(|_| FadeTail::new()).collect();
        let epochs = players.iter().map(|_| 0).collect();
        Self {
            players,
            tails,
            epochs,
            commands,
            to_feeder,
            shared,
        }
    }

    /// Renders one block of interleaved stereo into `out`. Always produces
    /// frames; any internal inconsistency becomes silence, never a panic.
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();

        let speed_modifier = self.shared.speed_modifier();
        let gain = self.shared.master_gain();
        // Linear balance: centre leaves both channels untouched, the
        // extremes silence the opposite side.
        let pan = self.shared.pan();
        let pan_l = gain * (1.0 - pan).min(1.0);
        let pan_r = gain * (1.0 + pan).min(1.0);

        for frame in out.chunks_exact_mut(2) {
            let mut left = 0.0f32;
            let mut right = 0.0f32;
            for (player, tail) in self.players.iter_mut().zip(self.tails.iter_mut()) {
                let (l, r) = player.render(speed_modifier);
                let (tl, tr) = tail.next_frame();
                left += l + tl;
                right += r + tr;
            }
            frame[0] = left * pan_l;
            frame[1] = right * pan_r;
        }

        for player in self.players.iter_mut() {
            player.update_hunger(speed_modifier);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RenderCommand::Arm {
                    slot,
                    descriptor,
                    envelope,
                    amplitude,
                    epoch,
                } => {
                    let player = &mut self.players[slot];
                    if player.is_playing() {
                        // Pre-render the outgoing voice's tail before the
                        // feeder is told about the new note, so the fade is
                        // taken from data the feeder has not yet replaced.
                        player.render_fade_tail(&mut self.tails[slot].samples);
                        self.tails[slot].pos = 0;
                    }
                    player.arm(descriptor.clone(), envelope, amplitude);
                    self.epochs[slot] = epoch;
                    let _ = self.to_feeder.try_send(FeedCommand::Arm {
                        slot,
                        descriptor,
                        epoch,
                    });
                }
                RenderCommand::End { slot, kind, epoch } => {
                    // A release for a previous owner of the slot is stale.
                    if self.epochs[slot] == epoch {
                        self.players[slot].end(kind);
                    }
                }
            }
        }
    }

    /// Starvation across all voices, for diagnostics.
    pub fn starved_frames(&self) -> u64 {
        self.shared.starved_frames()
    }
}
