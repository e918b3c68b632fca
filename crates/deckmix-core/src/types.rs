//! Common types for Deckmix
//!
//! Fundamental audio and transport types shared by the engine, the decoder
//! and the render path.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Default engine sample rate (48kHz - standard professional audio rate)
/// The actual rate comes from `EngineConfig` or the output device.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Number of decks in a standard two-deck setup
pub const DEFAULT_DECK_COUNT: usize = 2;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A single stereo sample (left and right channels)
///
/// Uses `#[repr(C)]` to ensure predictable memory layout: [left, right].
/// This enables zero-copy conversion between `&[StereoSample]` and `&[f32]`
/// (interleaved format) using bytemuck.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    /// Create a new stereo sample
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Create a silent stereo sample
    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Create a mono sample (same value in both channels)
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Linear interpolation between two samples (`t` in 0..=1)
    #[inline]
    pub fn lerp(&self, other: &Self, t: Sample) -> Self {
        Self {
            left: self.left + (other.left - self.left) * t,
            right: self.right + (other.right - self.right) * t,
        }
    }

    /// Get the peak amplitude (max of abs(left), abs(right))
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }

    /// Whether both channels hold finite values
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.right.is_finite()
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

/// A buffer of stereo samples
///
/// Used both for decoded track data and for render blocks.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); len],
        }
    }

    /// Create a buffer from interleaved samples [L, R, L, R, ...]
    ///
    /// A trailing odd sample is ignored.
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        let samples = interleaved
            .chunks_exact(2)
            .map(|chunk| StereoSample::new(chunk[0], chunk[1]))
            .collect();
        Self { samples }
    }

    /// Create a buffer from an existing Vec of StereoSamples
    pub fn from_vec(samples: Vec<StereoSample>) -> Self {
        Self { samples }
    }

    /// Get the number of stereo samples in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Fills any newly exposed elements with silence. Never allocates as long
    /// as `new_len` stays within the capacity reserved at construction.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        let current_len = self.samples.len();
        if new_len > current_len {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.samples.resize(new_len, StereoSample::silence());
        } else {
            self.samples.truncate(new_len);
        }
    }

    /// Get a slice of the samples
    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    /// Get a mutable slice of the samples
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Zero-copy view of the samples as interleaved f32 [L, R, L, R, ...]
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Get an iterator over the samples
    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }

    /// Get the peak amplitude in the buffer
    pub fn peak(&self) -> Sample {
        self.samples.iter().map(|s| s.peak()).fold(0.0, Sample::max)
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.samples[index]
    }
}

/// Deck identifier (0-based slot index)
///
/// The number of decks is fixed when the engine is built, so the id itself
/// carries no upper bound; the engine rejects ids it doesn't know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeckId(pub usize);

impl DeckId {
    /// Create a new deck ID
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Slot index of this deck
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }

    /// Get the deck number (1-based for display)
    pub fn display_number(&self) -> usize {
        self.0 + 1
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deck {}", self.display_number())
    }
}

/// Transport state of a deck
///
/// `Seeking` only exists inside a single `seek()` call and is never seen by
/// callers between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Empty,
    Loading,
    Ready,
    Playing,
    Paused,
    Seeking,
    Ended,
}

impl TransportState {
    /// Whether a track buffer is present in this state
    pub fn has_track(&self) -> bool {
        !matches!(self, TransportState::Empty | TransportState::Loading)
    }
}
