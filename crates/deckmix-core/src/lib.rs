//! Deckmix Core - multi-deck playback and mixing engine
//!
//! Decks play decoded tracks through per-deck gain and an equal-power
//! crossfader. Control calls happen on any thread through [`DeckEngine`];
//! audio is produced by a [`GraphRenderer`] on the audio thread.
//!
//! ```ignore
//! use deckmix_core::config::EngineConfig;
//! use deckmix_core::engine::DeckEngine;
//!
//! let (engine, mut renderer) = DeckEngine::new(EngineConfig::default());
//! engine.load_track_bytes(0, &wav_bytes)?;
//! engine.play(0)?;
//! engine.set_crossfade(0.25);
//!
//! // audio thread
//! renderer.process(&mut master_buffer);
//!
//! // UI tick
//! engine.process_events();
//! let decks = engine.snapshot();
//! ```
//!
//! [`DeckEngine`]: engine::DeckEngine
//! [`GraphRenderer`]: engine::GraphRenderer

#[cfg(feature = "cpal-output")]
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod pcm;
pub mod types;

pub use error::{DecodeError, EngineError, EngineResult, Unavailable};
pub use types::*;
