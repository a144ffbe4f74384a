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

//! Voice slot allocation and stealing.
//!
//! This is pure control-domain bookkeeping. The pool tracks which slots it
//! has handed out and observes the audio side's `active` flags to reclaim
//! them; it never touches audio data itself.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::voice::{EndKind, VoiceShared};

/// The lifecycle of a slot as seen by the control domain. `Pending` covers
/// the window between sending an arm command and the audio side picking it
/// up; pending slots are neither free nor stealable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending,
    Sounding,
}

#[derive(Debug)]
struct SlotBook {
    phase: Phase,
    note: u8,
    /// Note is still held (or deferred by the sustain pedal).
    pressed: bool,
    /// Note-off arrived while the sustain pedal was down.
    pending_release: bool,
    /// Arm generation, bumped on every allocation of this slot.
    epoch: u32,
}

/// The outcome of a successful note-on allocation.
#[derive(Debug, PartialEq, Eq)]
pub struct NoteOnPlan {
    pub slot: usize,
    pub epoch: u32,
    /// The chosen slot is currently sounding and must be faded before reuse.
    pub stolen: bool,
    /// A same-note voice that must be released fast to honour the cap.
    pub same_note_release: Option<Release>,
}

/// One release instruction for the renderer.
#[derive(Debug, PartialEq, Eq)]
pub struct Release {
    pub slot: usize,
    pub epoch: u32,
    pub kind: EndKind,
}

pub struct VoicePool {
    slots: Vec<SlotBook>,
    shared: Vec<Arc<VoiceShared>>,
    max_same_notes: usize,
    sustain: bool,
    steals: u64,
    dropped: u64,
}

impl VoicePool {
    pub fn new(shared: Vec<Arc<VoiceShared>>, max_same_notes: usize) -> Self {
        let slots = shared
            .iter()
            .map(|_| SlotBook {
                phase: Phase::Idle,
                note: 0,
                pressed: false,
                pending_release: false,
                epoch: 0,
            })
            .collect();
        Self {
            slots,
            shared,
            max_same_notes: max_same_notes.max(1),
            sustain: false,
            steals: 0,
            dropped: 0,
        }
    }

    /// Reconciles bookkeeping with the audio side's active flags.
    fn refresh(&mut self) {
        for (book, shared) in self.slots.iter_mut().zip(&self.shared) {
            let active = shared.active.load(Ordering::Acquire);
            match book.phase {
                Phase::Pending if active => book.phase = Phase::Sounding,
                Phase::Sounding if !active => {
                    book.phase = Phase::Idle;
                    book.pressed = false;
                    book.pending_release = false;
                }
                _ => {}
            }
        }
    }

    /// Allocates a slot for a note-on. Returns `None` when nothing is free
    /// or stealable; the note is dropped, counted, never an error.
    pub fn note_on(&mut self, note: u8) -> Option<NoteOnPlan> {
        self.refresh();

        let same_note_release = self.enforce_same_note_cap(note);

        let (slot, stolen) = match self.pick_slot(same_note_release.as_ref()) {
            Some(pick) => pick,
            None => {
                self.dropped += 1;
                warn!(note, dropped = self.dropped, "No stealable voice, note dropped");
                return None;
            }
        };

        if stolen {
            self.steals += 1;
            debug!(
                slot,
                old_note = self.slots[slot].note,
                new_note = note,
                "Stealing voice"
            );
        }

        let book = &mut self.slots[slot];
        book.phase = Phase::Pending;
        book.note = note;
        book.pressed = true;
        book.pending_release = false;
        book.epoch = book.epoch.wrapping_add(1);
        // Control is the single writer of the shared epoch; the store gates
        // any in-flight feed for the previous owner of this slot.
        self.shared[slot].epoch.store(book.epoch, Ordering::Release);

        Some(NoteOnPlan {
            slot,
            epoch: book.epoch,
            stolen,
            same_note_release,
        })
    }

    /// Rolls a freshly allocated slot back to idle when its arm command
    /// could not be delivered. A no-op once the slot has moved on.
    pub fn abort(&mut self, slot: usize, epoch: u32) {
        let book = &mut self.slots[slot];
        if book.phase == Phase::Pending && book.epoch == epoch {
            book.phase = Phase::Idle;
            book.pressed = false;
            book.pending_release = false;
        }
    }

    /// Releases the oldest same-note voice when the cap is reached.
    fn enforce_same_note_cap(&mut self, note: u8) -> Option<Release> {
        let sounding: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].phase != Phase::Idle && self.slots[i].note == note)
            .collect();
        if sounding.len() < self.max_same_notes {
            return None;
        }
        let oldest = sounding
            .into_iter()
            .max_by_key(|&i| self.shared[i].buffers_played.load(Ordering::Relaxed))?;
        let book = &mut self.slots[oldest];
        book.pressed = false;
        book.pending_release = false;
        debug!(note, slot = oldest, "Same-note cap reached, releasing oldest");
        Some(Release {
            slot: oldest,
            epoch: book.epoch,
            kind: EndKind::Fast,
        })
    }

    /// Free slot first; otherwise steal the oldest sounding voice, with the
    /// lowest current amplitude as the tiebreak. The slot already being
    /// released for the same-note cap is not picked twice.
    fn pick_slot(&self, excluded: Option<&Release>) -> Option<(usize, bool)> {
        if let Some(free) = (0..self.slots.len()).find(|&i| self.slots[i].phase == Phase::Idle) {
            return Some((free, false));
        }

        let excluded_slot = excluded.map(|r| r.slot);
        (0..self.slots.len())
            .filter(|&i| self.slots[i].phase == Phase::Sounding && Some(i) != excluded_slot)
            .max_by(|&a, &b| {
                let age_a = self.shared[a].buffers_played.load(Ordering::Relaxed);
                let age_b = self.shared[b].buffers_played.load(Ordering::Relaxed);
                // Oldest wins; quietest breaks the tie.
                age_a.cmp(&age_b).then(
                    self.shared[b]
                        .amplitude()
                        .partial_cmp(&self.shared[a].amplitude())
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
            })
            .map(|slot| (slot, true))
    }

    /// Handles a note-off. With the sustain pedal down the release is
    /// deferred; otherwise every pressed voice on the note is released.
    pub fn note_off(&mut self, note: u8, kind: EndKind) -> Vec<Release> {
        self.refresh();
        let mut releases = Vec::new();
        for (i, book) in self.slots.iter_mut().enumerate() {
            if book.phase == Phase::Idle || book.note != note || !book.pressed {
                continue;
            }
            if self.sustain {
                book.pending_release = true;
                continue;
            }
            book.pressed = false;
            releases.push(Release {
                slot: i,
                epoch: book.epoch,
                kind,
            });
        }
        releases
    }

    /// Updates the sustain pedal; lifting it flushes all deferred releases.
    pub fn set_sustain(&mut self, sustain: bool) -> Vec<Release> {
        self.sustain = sustain;
        if sustain {
            return Vec::new();
        }
        self.refresh();
        let mut releases = Vec::new();
        for (i, book) in self.slots.iter_mut().enumerate() {
            if book.phase != Phase::Idle && book.pending_release {
                book.pending_release = false;
                book.pressed = false;
                releases.push(Release {
                    slot: i,
                    epoch: book.epoch,
                    kind: EndKind::Regular,
                });
            }
        }
        releases
    }

    pub fn steals(&self) -> u64 {
        self.steals
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Slots the control domain currently considers in use.
    pub fn in_use(&mut self) -> usize {
        self.refresh();
        self.slots
            .iter()
            .filter(|book| book.phase != Phase::Idle)
            .count()
    }
}
