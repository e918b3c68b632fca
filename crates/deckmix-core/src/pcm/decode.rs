//! WAV decoding for loaded tracks
//!
//! Turns an in-memory RIFF/WAVE file into a [`PcmBuffer`]. Integer PCM
//! (8/16/24/32-bit) is normalized to -1.0..1.0; 32-bit float is taken as is.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use super::PcmBuffer;
use crate::error::DecodeError;
use crate::types::Sample;

/// Decode a complete WAV file held in memory
///
/// Errors leave nothing behind; the caller decides what happens to the deck.
pub fn decode_audio(bytes: &[u8]) -> Result<PcmBuffer, DecodeError> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.channels > 2 {
        return Err(DecodeError::UnsupportedChannelCount(spec.channels));
    }

    let interleaved: Vec<Sample> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?,
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1_i64 << (bits - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v as f64 * scale) as Sample))
                .collect::<Result<_, _>>()
                .map_err(|e| DecodeError::Malformed(e.to_string()))?
        }
        (format, bits) => {
            return Err(DecodeError::UnsupportedFormat(format!(
                "{:?} {}-bit",
                format, bits
            )))
        }
    };

    log::debug!(
        "decode_audio: {} samples, {} channel(s) at {}Hz",
        interleaved.len(),
        spec.channels,
        spec.sample_rate
    );

    PcmBuffer::from_interleaved(&interleaved, spec.channels, spec.sample_rate)
}
