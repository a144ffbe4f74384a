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

//! The feed-domain half of the engine: a background loop that owns the
//! volume and keeps every sounding voice's buffers ahead of its play
//! cursor, hungriest first.

use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use crate::playsync::CancelHandle;
use crate::voice::VoiceFeeder;
use crate::volume::{BlockDevice, Volume};

use super::FeedCommand;

/// How long the loop naps when every voice is satisfied.
const IDLE_SLEEP: Duration = Duration::from_micros(500);

pub struct Feeder<D: BlockDevice> {
    volume: Volume<D>,
    voices: Vec<VoiceFeeder>,
    commands: Receiver<FeedCommand>,
}

impl<D: BlockDevice> Feeder<D> {
    pub(super) fn new(
        volume: Volume<D>,
        voices: Vec<VoiceFeeder>,
        commands: Receiver<FeedCommand>,
    ) -> Self {
        Self {
            volume,
            voices,
            commands,
        }
    }

    /// Runs until cancelled. Storage latency lands here, never in the audio
    /// callback.
    pub fn run(mut self, cancel_handle: CancelHandle) {
        debug!(voices = self.voices.len(), "Feed loop running");
        while !cancel_handle.is_cancelled() {
            if !self.service() {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        debug!("Feed loop stopped");
    }

    /// One pass: drain arm commands, then feed the hungriest voice.
    /// Returns whether any work was done. Offline rendering drives this
    /// directly in lockstep with the renderer.
    pub fn service(&mut self) -> bool {
        let mut worked = false;

        while let Ok(command) = self.commands.try_recv() {
            match command {
                FeedCommand::Arm {
                    slot,
                    descriptor,
                    epoch,
                } => {
                    // A queued arm the control domain has already superseded
                    // is dropped whole; the current owner re-arms the slot.
                    if !self.voices[slot].epoch_current(epoch) {
                        debug!(slot, epoch, "Dropping superseded arm");
                        continue;
                    }
                    if let Err(e) = self.voices[slot].arm(&mut self.volume, descriptor, epoch) {
                        warn!(slot, error = %e, "Failed to arm voice");
                    }
                    worked = true;
                }
            }
        }

        let hungriest = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, voice)| voice.wants_fill())
            .max_by_key(|(_, voice)| voice.hunger())
            .map(|(slot, _)| slot);

        if let Some(slot) = hungriest {
            match self.voices[slot].fill_next(&mut self.volume) {
                Ok(published) => worked |= published,
                // A read failure starves one voice; it is not fatal to the
                // loop.
                Err(e) => warn!(slot, error = %e, "Feed read failed"),
            }
        }

        worked
    }
}
