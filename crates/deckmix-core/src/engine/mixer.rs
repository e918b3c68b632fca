//! Crossfader - equal-power blend between the A and B sides
//!
//! Every deck is assigned to a side. Decks on side A follow the A gain,
//! decks on side B the B gain, and `Thru` decks ignore the crossfader.

use std::f32::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use super::graph::AudioGraph;
use crate::error::EngineResult;

/// Crossfader side a deck is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossfadeSide {
    A,
    B,
    /// Bypasses the crossfader (gain 1.0)
    Thru,
}

impl CrossfadeSide {
    /// Default routing: deck 0 on A, deck 1 on B, the rest bypass
    pub fn default_for(deck: usize) -> Self {
        match deck {
            0 => CrossfadeSide::A,
            1 => CrossfadeSide::B,
            _ => CrossfadeSide::Thru,
        }
    }

    /// Pick this side's gain from an (A, B) pair
    #[inline]
    pub fn gain(self, gains: (f32, f32)) -> f32 {
        match self {
            CrossfadeSide::A => gains.0,
            CrossfadeSide::B => gains.1,
            CrossfadeSide::Thru => 1.0,
        }
    }
}

/// Equal-power gains `(A, B)` for a crossfader position in 0..=1
///
/// 0.0 is full A, 1.0 is full B, 0.5 puts both at ~0.707.
pub fn equal_power_gains(position: f32) -> (f32, f32) {
    let x = position.clamp(0.0, 1.0);
    let gain_a = (x * FRAC_PI_2).cos().max(0.0);
    let gain_b = ((1.0 - x) * FRAC_PI_2).cos().max(0.0);
    (gain_a, gain_b)
}

/// Crossfader state
///
/// Only stores the position; gains are derived and pushed to the graph on
/// every change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeMixer {
    position: f32,
}

impl CrossfadeMixer {
    pub fn new(position: f32) -> Self {
        Self {
            position: sanitize(position, 0.5),
        }
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    /// Current (A, B) gains
    pub fn gains(&self) -> (f32, f32) {
        equal_power_gains(self.position)
    }

    /// Move the crossfader and ramp every deck's crossfade gain
    ///
    /// Out-of-range values are clamped; NaN keeps the current position.
    pub fn set_crossfade(&mut self, graph: &mut AudioGraph, value: f32) -> EngineResult<()> {
        let position = sanitize(value, self.position);
        graph.set_crossfade_gains(equal_power_gains(position))?;
        self.position = position;
        Ok(())
    }
}

impl Default for CrossfadeMixer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

fn sanitize(value: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_power_endpoints() {
        let (a, b) = equal_power_gains(0.0);
        assert!((a - 1.0).abs() < 1e-6);
        assert!(b.abs() < 1e-6);

        let (a, b) = equal_power_gains(1.0);
        assert!(a.abs() < 1e-6);
        assert!((b - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_equal_power_center() {
        let (a, b) = equal_power_gains(0.5);
        assert!((a - 0.7071).abs() < 1e-3);
        assert!((b - 0.7071).abs() < 1e-3);
    }

    #[test]
    fn test_constant_power_across_range() {
        for i in 0..=20 {
            let (a, b) = equal_power_gains(i as f32 / 20.0);
            assert!((a * a + b * b - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(equal_power_gains(-3.0), equal_power_gains(0.0));
        assert_eq!(equal_power_gains(7.5), equal_power_gains(1.0));
        assert_eq!(CrossfadeMixer::new(2.0).position(), 1.0);
        assert_eq!(CrossfadeMixer::new(f32::NAN).position(), 0.5);
    }

    #[test]
    fn test_side_gain() {
        let gains = (0.2, 0.8);
        assert_eq!(CrossfadeSide::A.gain(gains), 0.2);
        assert_eq!(CrossfadeSide::B.gain(gains), 0.8);
        assert_eq!(CrossfadeSide::Thru.gain(gains), 1.0);
        assert_eq!(CrossfadeSide::default_for(3), CrossfadeSide::Thru);
    }
}
