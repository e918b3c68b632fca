//! Audio device error types

use thiserror::Error;

/// Errors opening or running the output device
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Only f32 output streams are supported
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The engine was built for another rate than the device runs at
    #[error("Sample rate mismatch: engine={engine}Hz, device={device}Hz")]
    SampleRateMismatch { engine: u32, device: u32 },
}

/// Result type for audio device operations
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message() {
        let err = AudioError::SampleRateMismatch {
            engine: 48000,
            device: 44100,
        };
        assert_eq!(
            err.to_string(),
            "Sample rate mismatch: engine=48000Hz, device=44100Hz"
        );
    }
}
