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

//! Velocity shaping: maps MIDI velocity (0-127) to an amplitude multiplier
//! and to a velocity-layer index when an instrument carries multiple
//! recordings per note.

use serde::{Deserialize, Serialize};

/// The shape applied between input velocity and output amplitude.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VelocityCurve {
    /// Amplitude proportional to velocity.
    #[default]
    Linear,
    /// Square-root shaping, compressed at the top for gentle dynamics.
    Soft,
    /// Squared shaping, expanded at the top for aggressive dynamics.
    Hard,
    /// Velocity ignored, full amplitude always.
    Constant,
}

impl VelocityCurve {
    /// Maps a MIDI velocity to an amplitude multiplier in [0, 1].
    pub fn amplitude(&self, velocity: u8) -> f32 {
        let x = velocity.min(127) as f32 / 127.0;
        match self {
            VelocityCurve::Linear => x,
            VelocityCurve::Soft => x.sqrt(),
            VelocityCurve::Hard => x * x,
            VelocityCurve::Constant => 1.0,
        }
    }
}

/// Picks the velocity-layer index for a velocity given how many layers an
/// instrument provides. Layers are equal-width buckets over 1-127; layer 0
/// is the softest.
pub fn layer_for(velocity: u8, layer_count: usize) -> usize {
    if layer_count <= 1 {
        return 0;
    }
    let v = velocity.min(127) as usize;
    (v * layer_count / 128).min(layer_count - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curves_monotonic_and_bounded() {
        for curve in [
            VelocityCurve::Linear,
            VelocityCurve::Soft,
            VelocityCurve::Hard,
            VelocityCurve::Constant,
        ] {
            let mut prev = curve.amplitude(0);
            for v in 1..=127u8 {
                let amp = curve.amplitude(v);
                assert!(amp >= prev, "{:?} not monotonic at {}", curve, v);
                assert!((0.0..=1.0).contains(&amp));
                prev = amp;
            }
            assert_eq!(curve.amplitude(127), 1.0);
        }
    }

    #[test]
    fn test_curve_shapes() {
        let mid = 64u8;
        let linear = VelocityCurve::Linear.amplitude(mid);
        assert!(VelocityCurve::Soft.amplitude(mid) > linear);
        assert!(VelocityCurve::Hard.amplitude(mid) < linear);
        assert_eq!(VelocityCurve::Constant.amplitude(1), 1.0);
    }

    #[test]
    fn test_layer_bucketing() {
        assert_eq!(layer_for(64, 1), 0);
        assert_eq!(layer_for(0, 4), 0);
        assert_eq!(layer_for(127, 4), 3);
        // Buckets are nondecreasing across the velocity range.
        let mut prev = 0;
        for v in 0..=127u8 {
            let layer = layer_for(v, 4);
            assert!(layer >= prev);
            prev = layer;
        }
    }
}
