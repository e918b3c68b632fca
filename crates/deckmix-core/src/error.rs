//! Engine error types

use thiserror::Error;

use crate::types::DeckId;

/// Why the render path can't accept work right now
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// Rendering is suspended (e.g. waiting for a user gesture to resume)
    #[error("audio context is suspended")]
    Suspended,

    /// The graph was torn down
    #[error("audio context is closed")]
    Closed,

    /// The render thread isn't draining its command queue
    #[error("render command queue is full")]
    QueueFull,
}

/// Errors produced while turning raw bytes or samples into a playable buffer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The source couldn't be read at all
    #[error("Failed to read audio: {0}")]
    Io(String),

    /// The container or stream is corrupt
    #[error("Malformed audio data: {0}")]
    Malformed(String),

    /// Valid container, but a sample format we don't handle
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Only mono and stereo sources are accepted
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannelCount(u16),

    #[error("Invalid sample rate: {0}Hz")]
    InvalidSampleRate(u32),

    /// No audio frames at all
    #[error("Audio data contains no frames")]
    Empty,

    #[error("Non-finite sample at frame {frame}")]
    NonFiniteSample { frame: usize },
}

/// Errors returned by control-plane operations
///
/// A failure is always scoped to the call (and at most to the deck it named);
/// other decks are never affected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The deck index doesn't exist in this engine
    #[error("Unknown deck: {0}")]
    UnknownDeck(usize),

    /// The operation needs a loaded track
    #[error("No track loaded on {0}")]
    NoTrackLoaded(DeckId),

    /// Decoding or validating the track failed; the deck is now empty
    #[error("Failed to decode track: {0}")]
    Decode(#[from] DecodeError),

    /// Host audio subsystem isn't ready; retry after resuming
    #[error("Audio engine unavailable: {0}")]
    EngineUnavailable(#[from] Unavailable),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
