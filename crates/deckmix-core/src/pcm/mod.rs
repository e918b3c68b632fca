//! Decoded track audio
//!
//! A [`PcmBuffer`] is an immutable, already-decoded stereo sample buffer at a
//! known sample rate. Decks replace it wholesale on load and never mutate it;
//! clones share the same samples.

mod decode;

pub use decode::decode_audio;

use basedrop::Shared;

use crate::engine::gc_handle;
use crate::error::DecodeError;
use crate::types::{Sample, StereoBuffer, StereoSample};

/// Highest sample rate we accept from a decoder
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Immutable decoded audio, shared between the control and render threads
///
/// Samples live behind a `basedrop::Shared`, so the render thread can drop
/// the last reference without freeing memory in the audio callback.
#[derive(Clone)]
pub struct PcmBuffer {
    samples: Shared<StereoBuffer>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Wrap stereo samples, validating them
    ///
    /// Rejects empty buffers, a zero or absurd sample rate, and NaN/inf samples.
    pub fn from_stereo(samples: StereoBuffer, sample_rate: u32) -> Result<Self, DecodeError> {
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(DecodeError::InvalidSampleRate(sample_rate));
        }
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }
        if let Some(frame) = samples.iter().position(|s| !s.is_finite()) {
            return Err(DecodeError::NonFiniteSample { frame });
        }

        Ok(Self {
            samples: Shared::new(&gc_handle(), samples),
            sample_rate,
        })
    }

    /// Build from interleaved samples with 1 or 2 channels
    ///
    /// Mono input is duplicated to both channels.
    pub fn from_interleaved(
        interleaved: &[Sample],
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, DecodeError> {
        let samples = match channels {
            1 => StereoBuffer::from_vec(interleaved.iter().map(|&s| StereoSample::mono(s)).collect()),
            2 => StereoBuffer::from_interleaved(interleaved),
            other => return Err(DecodeError::UnsupportedChannelCount(other)),
        };
        Self::from_stereo(samples, sample_rate)
    }

    /// Number of stereo frames
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    /// Sample rate the buffer was decoded at
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Frame at `index`, or silence past the end
    #[inline]
    pub fn frame(&self, index: usize) -> StereoSample {
        self.samples
            .as_slice()
            .get(index)
            .copied()
            .unwrap_or_default()
    }

    /// All frames
    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        self.samples.as_slice()
    }
}

impl std::fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let pcm = PcmBuffer::from_stereo(StereoBuffer::silence(48000 * 3), 48000).unwrap();
        assert_eq!(pcm.frames(), 144000);
        assert!((pcm.duration_seconds() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mono_is_duplicated() {
        let pcm = PcmBuffer::from_interleaved(&[0.25, -0.5], 1, 44100).unwrap();
        assert_eq!(pcm.frames(), 2);
        assert_eq!(pcm.frame(1), StereoSample::new(-0.5, -0.5));
        assert_eq!(pcm.frame(5), StereoSample::silence());
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert_eq!(
            PcmBuffer::from_stereo(StereoBuffer::silence(0), 48000).unwrap_err(),
            DecodeError::Empty
        );
        assert_eq!(
            PcmBuffer::from_stereo(StereoBuffer::silence(4), 0).unwrap_err(),
            DecodeError::InvalidSampleRate(0)
        );
        assert_eq!(
            PcmBuffer::from_interleaved(&[0.0; 6], 3, 48000).unwrap_err(),
            DecodeError::UnsupportedChannelCount(3)
        );

        let mut samples = StereoBuffer::silence(4);
        samples[2] = StereoSample::new(f32::NAN, 0.0);
        assert_eq!(
            PcmBuffer::from_stereo(samples, 48000).unwrap_err(),
            DecodeError::NonFiniteSample { frame: 2 }
        );
    }

    #[test]
    fn test_clone_shares_samples() {
        let pcm = PcmBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4], 2, 48000).unwrap();
        let clone = pcm.clone();
        assert_eq!(clone.as_slice().as_ptr(), pcm.as_slice().as_ptr());
    }
}
