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

//! State shared between the two halves of a voice.
//!
//! Every field here crosses the audio/feed domain boundary and has exactly
//! one writer. The byte buffers follow a single-producer/single-consumer
//! discipline: the feed half writes a buffer only while its `empty` flag is
//! set, the play half reads it only while the flag is clear, and the flag
//! itself transfers ownership with release/acquire ordering.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::volume::SECTOR_SIZE;

/// Sectors read per buffer fill.
pub const READ_SECTORS_PER_FILL: usize = 7;

/// Capacity of one voice buffer in bytes.
pub const BUFFER_CAPACITY: usize = READ_SECTORS_PER_FILL * SECTOR_SIZE;

/// One of the two alternating byte buffers of a voice.
pub struct SectorBuffer {
    data: Box<[UnsafeCell<u8>]>,
    /// Bytes of valid data, always whole frames. Written by the filler
    /// before `empty` clears.
    valid: AtomicU32,
    /// Ownership flag: set means the feed half may write, clear means the
    /// play half may read.
    empty: AtomicBool,
}

// SAFETY: access to `data` is serialized by the `empty` flag; each side
// touches the bytes only while it holds the flag state that grants it
// ownership.
unsafe impl Sync for SectorBuffer {}
unsafe impl Send for SectorBuffer {}

impl SectorBuffer {
    fn new() -> Self {
        Self {
            data: (0..BUFFER_CAPACITY).map(|_| UnsafeCell::new(0)).collect(),
            valid: AtomicU32::new(0),
            empty: AtomicBool::new(true),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::Acquire)
    }

    /// Copies `src` into the buffer and hands it to the play half.
    ///
    /// Must only be called by the feed half while `is_empty()` is true.
    pub fn publish(&self, src: &[u8]) {
        debug_assert!(src.len() <= BUFFER_CAPACITY);
        debug_assert!(self.is_empty());
        // SAFETY: we are the only writer while `empty` is set (SPSC
        // guarantee); the play half does not read until the Release store
        // of `empty` below makes the bytes visible.
        unsafe {
            let dst = self.data.as_ptr() as *mut u8;
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
        self.valid.store(src.len() as u32, Ordering::Release);
        self.empty.store(false, Ordering::Release);
    }

    /// The valid bytes of the buffer.
    ///
    /// Must only be called by the play half while `is_empty()` is false.
    pub fn bytes(&self) -> &[u8] {
        let len = self.valid.load(Ordering::Acquire) as usize;
        // SAFETY: the feed half does not write while `empty` is clear, and
        // the Acquire load of `valid` pairs with the filler's Release store.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const u8, len) }
    }

    /// Returns the drained buffer to the feed half.
    pub fn mark_empty(&self) {
        self.valid.store(0, Ordering::Release);
        self.empty.store(true, Ordering::Release);
    }
}

/// The cross-domain scalars of one voice slot.
///
/// Writer domains: `active`, `hunger`, `amplitude`, `buffers_played` and
/// `starved_frames` belong to the audio domain; `eof` belongs to the feed
/// domain; `epoch` belongs to the control domain and gates stale feeds
/// after a steal.
pub struct VoiceShared {
    pub bufs: [SectorBuffer; 2],
    pub active: AtomicBool,
    pub eof: AtomicBool,
    pub hunger: AtomicU32,
    amplitude: AtomicU32,
    pub buffers_played: AtomicU32,
    pub epoch: AtomicU32,
    pub starved_frames: AtomicU64,
}

impl VoiceShared {
    pub fn new() -> Self {
        Self {
            bufs: [SectorBuffer::new(), SectorBuffer::new()],
            active: AtomicBool::new(false),
            eof: AtomicBool::new(true),
            hunger: AtomicU32::new(0),
            amplitude: AtomicU32::new(0),
            buffers_played: AtomicU32::new(0),
            epoch: AtomicU32::new(0),
            starved_frames: AtomicU64::new(0),
        }
    }

    /// Current envelope amplitude as observed by the control domain.
    pub fn amplitude(&self) -> f32 {
        f32::from_bits(self.amplitude.load(Ordering::Relaxed))
    }

    pub fn set_amplitude(&self, value: f32) {
        self.amplitude.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for VoiceShared {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_drain() {
        let buf = SectorBuffer::new();
        assert!(buf.is_empty());

        buf.publish(&[1, 2, 3, 4]);
        assert!(!buf.is_empty());
        assert_eq!(buf.bytes(), &[1, 2, 3, 4]);

        buf.mark_empty();
        assert!(buf.is_empty());

        // The buffer is reusable after a drain.
        buf.publish(&[9; BUFFER_CAPACITY]);
        assert_eq!(buf.bytes().len(), BUFFER_CAPACITY);
    }

    #[test]
    fn test_amplitude_round_trip() {
        let shared = VoiceShared::new();
        shared.set_amplitude(0.625);
        assert_eq!(shared.amplitude(), 0.625);
    }
}
