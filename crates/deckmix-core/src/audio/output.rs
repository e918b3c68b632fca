//! CPAL output stream driving the graph renderer

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};

use super::error::{AudioError, AudioResult};
use crate::engine::GraphRenderer;

/// Keeps the output stream alive; drop it to stop audio
pub struct OutputHandle {
    _stream: Stream,
    sample_rate: u32,
    channels: u16,
}

impl OutputHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

fn default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))
}

/// Sample rate the default output device runs at
///
/// Use it for `EngineConfig::sample_rate` before building the engine.
pub fn default_output_sample_rate() -> AudioResult<u32> {
    let config = default_device()?
        .default_output_config()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    Ok(config.sample_rate().0)
}

/// Open the default output device and render `renderer` into it
pub fn start_output(mut renderer: GraphRenderer) -> AudioResult<OutputHandle> {
    let device = default_device()?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            supported.sample_format()
        )));
    }

    let sample_rate = supported.sample_rate().0;
    if sample_rate != renderer.sample_rate() {
        return Err(AudioError::SampleRateMismatch {
            engine: renderer.sample_rate(),
            device: sample_rate,
        });
    }

    let stream_config = supported.config();
    let channels = stream_config.channels;
    let channel_count = channels as usize;

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                renderer.render_interleaved(data, channel_count);
            },
            move |err| {
                log::error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!(
        "Audio output started on {}: {} channels at {}Hz",
        device_name,
        channels,
        sample_rate
    );

    Ok(OutputHandle {
        _stream: stream,
        sample_rate,
        channels,
    })
}
