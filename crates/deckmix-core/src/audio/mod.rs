//! Device output through CPAL
//!
//! Moves a [`GraphRenderer`](crate::engine::GraphRenderer) into the output
//! stream callback of the default device. The engine itself stays on the
//! control side; nothing here locks.
//!
//! ```ignore
//! use deckmix_core::audio::{default_output_sample_rate, start_output};
//! use deckmix_core::config::EngineConfig;
//! use deckmix_core::engine::DeckEngine;
//!
//! let config = EngineConfig {
//!     sample_rate: default_output_sample_rate()?,
//!     ..Default::default()
//! };
//! let (engine, renderer) = DeckEngine::new(config);
//! let _output = start_output(renderer)?;
//! engine.load_track_bytes(0, &wav_bytes)?;
//! engine.play(0)?;
//! ```

mod error;
mod output;

pub use error::{AudioError, AudioResult};
pub use output::{default_output_sample_rate, start_output, OutputHandle};
