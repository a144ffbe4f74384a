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

//! Streaming voices.
//!
//! A voice is split into two halves that live in different concurrency
//! domains: the [`player::VoicePlayer`] renders audio frames in the
//! real-time callback and never blocks, while the [`feeder::VoiceFeeder`]
//! streams sector data off the volume from a background thread. The halves
//! communicate only through [`shared::VoiceShared`].

pub mod adsr;
pub mod decode;
pub mod feeder;
pub mod player;
pub mod shared;

use std::sync::Arc;

pub use feeder::VoiceFeeder;
pub use player::VoicePlayer;
pub use shared::VoiceShared;

/// How a voice is asked to stop sounding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndKind {
    /// Normal note release.
    Regular,
    /// A quick release, used when a voice must yield soon.
    Fast,
    /// Immediate silence; always paired with a pre-rendered fade tail so
    /// the cut is inaudible.
    Now,
}

/// Creates the two halves of one voice slot wired to fresh shared state.
pub fn voice_pair(output_rate: u32) -> (VoicePlayer, VoiceFeeder) {
    let shared = Arc::new(VoiceShared::new());
    (
        VoicePlayer::new(Arc::clone(&shared), output_rate),
        VoiceFeeder::new(shared),
    )
}
