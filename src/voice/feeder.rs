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

//! The feed-domain half of a voice: walks the extent list and keeps the
//! buffer pair full ahead of the play cursor.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::catalog::SampleDescriptor;
use crate::volume::{BlockDevice, Volume, VolumeError};

use super::shared::{VoiceShared, BUFFER_CAPACITY};

pub struct VoiceFeeder {
    shared: Arc<VoiceShared>,
    descriptor: Option<Arc<SampleDescriptor>>,
    /// The arm generation this half was armed with; a mismatch against the
    /// shared epoch means the slot was stolen and this fill is stale.
    epoch: u32,
    /// Byte offset of the read cursor within the PCM payload.
    read_pos: u64,
    /// Which buffer receives the next fill. Follows the play half's toggle
    /// order by construction.
    next_fill: usize,
    /// Loop region in payload bytes.
    loop_bytes: Option<(u64, u64)>,
    /// Staging area for one fill; reused, never reallocated.
    fill_buf: Box<[u8]>,
}

impl VoiceFeeder {
    pub fn new(shared: Arc<VoiceShared>) -> Self {
        Self {
            shared,
            descriptor: None,
            epoch: 0,
            read_pos: 0,
            next_fill: 0,
            loop_bytes: None,
            fill_buf: vec![0u8; BUFFER_CAPACITY].into_boxed_slice(),
        }
    }

    /// Arms this half for a new note and performs the initial synchronous
    /// fills so playback can begin without an audible gap.
    pub fn arm<D: BlockDevice>(
        &mut self,
        volume: &mut Volume<D>,
        descriptor: Arc<SampleDescriptor>,
        epoch: u32,
    ) -> Result<(), VolumeError> {
        self.shared.bufs[0].mark_empty();
        self.shared.bufs[1].mark_empty();
        self.shared.eof.store(false, Ordering::Release);

        let frame_size = descriptor.frame_size();
        self.loop_bytes = descriptor
            .loop_region
            .map(|(start, end)| (start * frame_size, end * frame_size));
        self.descriptor = Some(descriptor);
        self.epoch = epoch;
        self.read_pos = 0;
        self.next_fill = 0;

        self.fill_next(volume)?;
        self.fill_next(volume)?;
        Ok(())
    }

    /// Refills the buffer currently awaiting data, one read unit of whole
    /// frames per call. Returns whether anything was published.
    pub fn fill_next<D: BlockDevice>(
        &mut self,
        volume: &mut Volume<D>,
    ) -> Result<bool, VolumeError> {
        let Some(descriptor) = self.descriptor.clone() else {
            return Ok(false);
        };
        // A steal bumped the epoch; let this fill die without touching the
        // buffers the next owner will use.
        if self.shared.epoch.load(Ordering::Acquire) != self.epoch {
            return Ok(false);
        }
        if self.shared.eof.load(Ordering::Acquire) {
            return Ok(false);
        }
        let buf = &self.shared.bufs[self.next_fill];
        if !buf.is_empty() {
            return Ok(false);
        }

        let frame_size = descriptor.frame_size();
        // Whole frames only, so no frame ever spans a buffer boundary.
        let target = BUFFER_CAPACITY as u64 / frame_size * frame_size;
        let limit = self
            .loop_bytes
            .map(|(_, end)| end)
            .unwrap_or(descriptor.data_len);

        let mut filled = 0u64;
        while filled < target {
            let remaining = limit.saturating_sub(self.read_pos);
            if remaining == 0 {
                match self.loop_bytes {
                    // Wrap the read cursor back to the loop start and keep
                    // filling the same buffer.
                    Some((start, _)) => {
                        self.read_pos = start;
                        continue;
                    }
                    None => break,
                }
            }
            let take = (target - filled).min(remaining) as usize;
            let dst = &mut self.fill_buf[filled as usize..filled as usize + take];
            volume.read_range(&descriptor.extents, descriptor.data_offset + self.read_pos, dst)?;
            self.read_pos += take as u64;
            filled += take as u64;
        }

        // The slot may have been stolen while the read was in flight. The
        // next owner has already reset the buffers and eof; publish nothing.
        if self.shared.epoch.load(Ordering::Acquire) != self.epoch {
            return Ok(false);
        }

        if filled == 0 {
            self.shared.eof.store(true, Ordering::Release);
            return Ok(false);
        }
        if filled < target && self.read_pos >= limit && self.loop_bytes.is_none() {
            self.shared.eof.store(true, Ordering::Release);
        }

        buf.publish(&self.fill_buf[..filled as usize]);
        self.next_fill ^= 1;
        Ok(true)
    }

    /// Whether a fill would publish data right now.
    pub fn wants_fill(&self) -> bool {
        self.descriptor.is_some()
            && !self.shared.eof.load(Ordering::Acquire)
            && self.shared.epoch.load(Ordering::Acquire) == self.epoch
            && self.shared.bufs[self.next_fill].is_empty()
    }

    /// The hunger scalar published by the play half, used to rank refills.
    pub fn hunger(&self) -> u32 {
        self.shared.hunger.load(Ordering::Relaxed)
    }

    /// Whether `epoch` is still the live arm generation for this slot.
    pub(crate) fn epoch_current(&self, epoch: u32) -> bool {
        self.shared.epoch.load(Ordering::Acquire) == epoch
    }

    pub(crate) fn shared(&self) -> &Arc<VoiceShared> {
        &self.shared
    }
}
