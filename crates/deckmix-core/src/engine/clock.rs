//! Engine clock and playback position model
//!
//! The render path runs on its own clock. Decks never store a "current
//! position" while playing; they store an anchor pair (engine time, track
//! position) and [`DeckTiming::position`] extrapolates from it. The
//! extrapolation is a pure function so UI polling can call it at any rate
//! without disturbing anything.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of engine time in seconds
///
/// `advance` is called by the renderer after every block. Clocks driven from
/// elsewhere (tests, offline hosts) can ignore it.
pub trait EngineClock: Send + Sync {
    /// Current engine time in seconds (monotonic)
    fn now(&self) -> f64;

    /// Account for `frames` rendered at the engine sample rate
    fn advance(&self, _frames: u64) {}
}

/// Clock derived from the number of frames the renderer has produced
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Total frames rendered so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

impl EngineClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

/// Externally driven clock
///
/// Holds an f64 in an atomic so it can be shared with the engine and moved
/// from a test or an offline host.
#[derive(Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance_by(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl EngineClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Timing anchors for one deck
///
/// While playing, `engine_anchor_time` is `Some` and position is computed.
/// Otherwise `position_anchor` is the position.
///
/// A speed change while playing is ramped on the render side, so the anchor
/// also records the speed the ramp started from and how long it lasts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeckTiming {
    /// Track position (seconds) at the last anchor
    pub position_anchor: f64,
    /// Engine time (seconds) at the last transition into Playing
    pub engine_anchor_time: Option<f64>,
    /// Target playback speed
    pub speed: f64,
    /// Speed at the anchor instant (start of the ramp)
    pub ramp_from_speed: f64,
    /// Length of the speed ramp in seconds (0 = no ramp)
    pub ramp_seconds: f64,
    /// Track duration in seconds (0 when empty)
    pub duration: f64,
}

impl Default for DeckTiming {
    fn default() -> Self {
        Self {
            position_anchor: 0.0,
            engine_anchor_time: None,
            speed: 1.0,
            ramp_from_speed: 1.0,
            ramp_seconds: 0.0,
            duration: 0.0,
        }
    }
}

impl DeckTiming {
    /// Playback position in seconds at `engine_now`
    pub fn position(&self, engine_now: f64) -> f64 {
        match self.engine_anchor_time {
            Some(anchor_time) => {
                let elapsed = (engine_now - anchor_time).max(0.0);
                self.clamp(self.position_anchor + self.advance(elapsed))
            }
            None => self.position_anchor,
        }
    }

    /// Instantaneous playback speed at `engine_now`
    pub fn speed_at(&self, engine_now: f64) -> f64 {
        match self.engine_anchor_time {
            Some(anchor_time) if self.ramp_seconds > 0.0 => {
                let elapsed = (engine_now - anchor_time).max(0.0);
                if elapsed >= self.ramp_seconds {
                    self.speed
                } else {
                    let t = elapsed / self.ramp_seconds;
                    self.ramp_from_speed + (self.speed - self.ramp_from_speed) * t
                }
            }
            _ => self.speed,
        }
    }

    /// Whether a playing deck has run into the end of its track
    pub fn reached_end(&self, engine_now: f64) -> bool {
        self.engine_anchor_time.is_some() && self.position(engine_now) >= self.duration
    }

    /// Start extrapolating from `position_anchor` at `engine_now`
    pub fn start(&mut self, engine_now: f64) {
        self.engine_anchor_time = Some(engine_now);
        self.ramp_from_speed = self.speed;
        self.ramp_seconds = 0.0;
    }

    /// Freeze at `position` and stop extrapolating
    pub fn freeze_at(&mut self, position: f64) {
        self.position_anchor = self.clamp(position);
        self.engine_anchor_time = None;
        self.ramp_from_speed = self.speed;
        self.ramp_seconds = 0.0;
    }

    /// Change speed while playing: re-anchor at the current position and
    /// ramp from the current instantaneous speed over `ramp_seconds`
    pub fn rebase_speed(&mut self, engine_now: f64, speed: f64, ramp_seconds: f64) {
        let position = self.position(engine_now);
        let from = self.speed_at(engine_now);
        self.position_anchor = position;
        self.engine_anchor_time = Some(engine_now);
        self.ramp_from_speed = from;
        self.speed = speed;
        self.ramp_seconds = ramp_seconds.max(0.0);
    }

    /// Clamp a position into the track (NaN → 0)
    pub fn clamp(&self, position: f64) -> f64 {
        if position.is_nan() {
            return 0.0;
        }
        position.clamp(0.0, self.duration.max(0.0))
    }

    /// Track seconds covered `elapsed` engine seconds after the anchor
    fn advance(&self, elapsed: f64) -> f64 {
        let ramp = self.ramp_seconds;
        let from = self.ramp_from_speed;
        if ramp <= 0.0 {
            return elapsed * self.speed;
        }
        if elapsed < ramp {
            from * elapsed + (self.speed - from) * elapsed * elapsed / (2.0 * ramp)
        } else {
            ramp * (from + self.speed) / 2.0 + self.speed * (elapsed - ramp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(anchor: f64, at: f64, speed: f64, duration: f64) -> DeckTiming {
        let mut timing = DeckTiming {
            position_anchor: anchor,
            speed,
            duration,
            ..Default::default()
        };
        timing.start(at);
        timing
    }

    #[test]
    fn test_position_when_stopped_is_anchor() {
        let timing = DeckTiming {
            position_anchor: 3.5,
            duration: 10.0,
            ..Default::default()
        };
        assert_eq!(timing.position(0.0), 3.5);
        assert_eq!(timing.position(1000.0), 3.5);
    }

    #[test]
    fn test_position_while_playing() {
        let timing = playing(2.0, 100.0, 1.5, 60.0);
        assert!((timing.position(100.0) - 2.0).abs() < 1e-12);
        assert!((timing.position(104.0) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_position_clamps_to_duration() {
        let timing = playing(9.0, 0.0, 1.0, 10.0);
        assert_eq!(timing.position(5.0), 10.0);
        assert!(timing.reached_end(5.0));
        assert!(!timing.reached_end(0.5));
    }

    #[test]
    fn test_position_is_monotonic() {
        let timing = playing(0.0, 1.0, 0.75, 30.0);
        let mut last = timing.position(1.0);
        for i in 1..500 {
            let now = 1.0 + i as f64 * 0.01;
            let pos = timing.position(now);
            assert!(pos >= last);
            last = pos;
        }
    }

    #[test]
    fn test_speed_ramp_integral() {
        // 1.0 -> 2.0 over 0.5s covers 0.75s of track, then 2x
        let mut timing = playing(0.0, 0.0, 1.0, 100.0);
        timing.rebase_speed(1.0, 2.0, 0.5);

        assert!((timing.position(1.0) - 1.0).abs() < 1e-12);
        assert!((timing.position(1.5) - 1.75).abs() < 1e-12);
        assert!((timing.position(2.5) - 3.75).abs() < 1e-12);
        assert!((timing.speed_at(1.25) - 1.5).abs() < 1e-12);
        assert_eq!(timing.speed_at(3.0), 2.0);
    }

    #[test]
    fn test_speed_ramp_down_stays_monotonic() {
        let mut timing = playing(0.0, 0.0, 4.0, 100.0);
        timing.rebase_speed(1.0, 0.1, 0.05);
        let mut last = timing.position(1.0);
        for i in 1..200 {
            let pos = timing.position(1.0 + i as f64 * 0.001);
            assert!(pos >= last);
            last = pos;
        }
    }

    #[test]
    fn test_freeze_clamps() {
        let mut timing = playing(0.0, 0.0, 1.0, 5.0);
        timing.freeze_at(7.0);
        assert_eq!(timing.position(100.0), 5.0);
        assert!(timing.engine_anchor_time.is_none());

        timing.freeze_at(f64::NAN);
        assert_eq!(timing.position_anchor, 0.0);
        timing.freeze_at(-3.0);
        assert_eq!(timing.position_anchor, 0.0);
    }

    #[test]
    fn test_frame_clock() {
        let clock = FrameClock::new(48000);
        assert_eq!(clock.now(), 0.0);
        clock.advance(24000);
        assert!((clock.now() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_manual_clock_ignores_render_advance() {
        let clock = ManualClock::new(1.0);
        clock.advance(48000);
        assert_eq!(clock.now(), 1.0);
        clock.advance_by(0.25);
        assert_eq!(clock.now(), 1.25);
    }
}
