//! Engine configuration
//!
//! Everything the engine needs to know up front: how many decks, the render
//! sample rate, parameter ramp length and the speed bounds.

use serde::{Deserialize, Serialize};

use crate::engine::CrossfadeSide;
use crate::types::{DEFAULT_DECK_COUNT, DEFAULT_SAMPLE_RATE};

/// Lowest accepted engine sample rate
const MIN_SAMPLE_RATE: u32 = 8000;
/// Highest accepted engine sample rate
const MAX_SAMPLE_RATE: u32 = 384_000;

/// Deck engine configuration
///
/// Missing fields in a YAML file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of decks
    /// Default: 2
    pub deck_count: usize,

    /// Render sample rate in Hz
    /// Should match the output device; use `default_output_sample_rate()`
    /// when the `cpal-output` feature is enabled.
    /// Default: 48000
    pub sample_rate: u32,

    /// Lowest playback speed `set_speed` accepts
    /// Default: 0.1
    pub min_speed: f64,

    /// Highest playback speed `set_speed` accepts
    /// Default: 4.0
    pub max_speed: f64,

    /// Ramp length for volume, crossfade and speed changes, in milliseconds
    /// Default: 50
    pub gain_ramp_ms: f32,

    /// Crossfader position at startup (0.0 = full A, 1.0 = full B)
    /// Default: 0.5
    pub initial_crossfade: f32,

    /// Crossfader side per deck; decks past the end of the list bypass it
    /// Default: [a, b]
    pub crossfade_sides: Vec<CrossfadeSide>,

    /// Capacity of the control → render command queue
    /// Default: 1024
    pub command_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deck_count: DEFAULT_DECK_COUNT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            min_speed: 0.1,
            max_speed: 4.0,
            gain_ramp_ms: 50.0,
            initial_crossfade: 0.5,
            crossfade_sides: vec![CrossfadeSide::A, CrossfadeSide::B],
            command_queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Return a copy with every field forced into a usable range
    ///
    /// Hand-edited files can hold anything; rather than refusing to start,
    /// bad values are clamped (and logged).
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.deck_count == 0 {
            log::warn!("EngineConfig: deck_count 0, using 1");
            self.deck_count = 1;
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            log::warn!(
                "EngineConfig: sample_rate {} out of range, using {}",
                self.sample_rate,
                defaults.sample_rate
            );
            self.sample_rate = defaults.sample_rate;
        }
        if !(self.min_speed.is_finite() && self.min_speed > 0.0) {
            self.min_speed = defaults.min_speed;
        }
        if !(self.max_speed.is_finite() && self.max_speed >= self.min_speed) {
            log::warn!(
                "EngineConfig: invalid speed range {}..{}, using defaults",
                self.min_speed,
                self.max_speed
            );
            self.min_speed = defaults.min_speed;
            self.max_speed = defaults.max_speed;
        }
        if !(self.gain_ramp_ms.is_finite() && self.gain_ramp_ms >= 0.0) {
            self.gain_ramp_ms = defaults.gain_ramp_ms;
        }
        self.initial_crossfade = if self.initial_crossfade.is_nan() {
            defaults.initial_crossfade
        } else {
            self.initial_crossfade.clamp(0.0, 1.0)
        };
        self.command_queue_capacity = self.command_queue_capacity.max(16);
        self
    }

    /// Crossfader side configured for a deck
    pub fn crossfade_side(&self, deck: usize) -> CrossfadeSide {
        self.crossfade_sides
            .get(deck)
            .copied()
            .unwrap_or(CrossfadeSide::Thru)
    }

    /// Ramp length in frames at the engine sample rate
    pub fn gain_ramp_frames(&self) -> u32 {
        (self.gain_ramp_ms.max(0.0) as f64 / 1000.0 * self.sample_rate as f64).round() as u32
    }

    /// Clamp a requested speed into the configured range (NaN → 1.0)
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        if speed.is_nan() {
            1.0_f64.clamp(self.min_speed, self.max_speed)
        } else {
            speed.clamp(self.min_speed, self.max_speed)
        }
    }
}
