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

//! The per-voice amplitude envelope.
//!
//! Every segment is a one-pole exponential approach toward a target. There
//! is no distinct sustain segment: decay approaches the sustain level and
//! holds there once converged. Release segments aim slightly below zero so
//! they finish in bounded time.

use crate::config::EnvelopeConfig;

use super::EndKind;

/// Duration of the fast release used when a voice must get out of the way.
const FAST_RELEASE_TIME: f32 = 0.01;

/// Segment targets sit a little past their endpoint so the value actually
/// crosses it; the attack overshoot also shapes the curve.
const ATTACK_TARGET: f32 = 1.01;
const RELEASE_FLOOR: f32 = -0.001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    Idle,
    Attack,
    Decay,
    Release,
    FastRelease,
}

pub struct Adsr {
    segment: Segment,
    value: f32,
    /// Target and coefficient of the segment currently running.
    target: f32,
    coeff: f32,
    sustain: f32,
    attack_coeff: f32,
    decay_coeff: f32,
    release_coeff: f32,
    fast_release_coeff: f32,
    sample_rate: f32,
}

/// One-pole coefficient reaching ~63% of the target within `time`.
fn one_pole(time: f32, sample_rate: f32) -> f32 {
    if time <= 0.0 {
        1.0
    } else {
        1.0 - (-1.0 / (time * sample_rate)).exp()
    }
}

/// Attack coefficient chosen so the overshooting segment crosses 1.0 in
/// exactly `time`.
fn attack_pole(time: f32, sample_rate: f32) -> f32 {
    if time <= 0.0 {
        1.0
    } else {
        1.0 - ((1.0 - 1.0 / ATTACK_TARGET).ln() / (time * sample_rate)).exp()
    }
}

impl Adsr {
    pub fn new(sample_rate: u32) -> Self {
        let mut adsr = Self {
            segment: Segment::Idle,
            value: 0.0,
            target: RELEASE_FLOOR,
            coeff: 1.0,
            sustain: 1.0,
            attack_coeff: 1.0,
            decay_coeff: 1.0,
            release_coeff: 1.0,
            fast_release_coeff: 1.0,
            sample_rate: sample_rate as f32,
        };
        adsr.configure(&EnvelopeConfig::default());
        adsr
    }

    /// Recomputes all segment coefficients; called when a voice is armed.
    pub fn configure(&mut self, env: &EnvelopeConfig) {
        // A non-positive sustain level forces the envelope idle.
        self.sustain = if env.sustain_level <= 0.0 {
            RELEASE_FLOOR
        } else {
            env.sustain_level.min(1.0)
        };
        self.attack_coeff = attack_pole(env.attack_time, self.sample_rate);
        self.decay_coeff = one_pole(env.decay_time, self.sample_rate);
        self.release_coeff = one_pole(env.release_time, self.sample_rate);
        self.fast_release_coeff = one_pole(FAST_RELEASE_TIME, self.sample_rate);
    }

    /// Forces the envelope back into attack. A hard retrigger resets the
    /// value to zero first, which clicks; a soft one attacks from the
    /// current value.
    pub fn retrigger(&mut self, hard: bool) {
        if hard {
            self.value = 0.0;
        }
        self.segment = Segment::Attack;
        self.target = ATTACK_TARGET;
        self.coeff = self.attack_coeff;
    }

    /// Moves the envelope toward idle. `Now` goes there immediately and is
    /// idempotent.
    pub fn end(&mut self, kind: EndKind) {
        match kind {
            EndKind::Regular => {
                self.segment = Segment::Release;
                self.target = RELEASE_FLOOR;
                self.coeff = self.release_coeff;
            }
            EndKind::Fast => {
                self.segment = Segment::FastRelease;
                self.target = RELEASE_FLOOR;
                self.coeff = self.fast_release_coeff;
            }
            EndKind::Now => {
                self.segment = Segment::Idle;
                self.value = 0.0;
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.segment == Segment::Idle
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn value(&self) -> f32 {
        self.value.clamp(0.0, 1.0)
    }

    /// Advances one sample and returns the amplitude in [0, 1].
    pub fn process(&mut self) -> f32 {
        match self.segment {
            Segment::Idle => 0.0,
            Segment::Attack | Segment::Decay if self.sustain <= 0.0 => {
                self.segment = Segment::Idle;
                self.value = 0.0;
                0.0
            }
            Segment::Attack => {
                self.value += self.coeff * (self.target - self.value);
                if self.value >= 1.0 {
                    self.value = 1.0;
                    self.segment = Segment::Decay;
                    self.target = self.sustain;
                    self.coeff = self.decay_coeff;
                }
                self.value()
            }
            Segment::Decay => {
                // Approaches the sustain level and holds; there is no
                // separate sustain segment.
                self.value += self.coeff * (self.target - self.value);
                self.value()
            }
            Segment::Release | Segment::FastRelease => {
                self.value += self.coeff * (self.target - self.value);
                if self.value <= 0.0 {
                    self.segment = Segment::Idle;
                    self.value = 0.0;
                }
                self.value()
            }
        }
    }
}
