//! Configuration for the deck engine
//!
//! - [`EngineConfig`]: deck count, sample rate, ramps and speed bounds
//! - Generic YAML loading/saving
//! - Default config locations
//!
//! # Usage
//!
//! ```ignore
//! use deckmix_core::config::{default_config_path, load_engine_config, save_config};
//!
//! let path = default_config_path("engine.yaml");
//! let config = load_engine_config(&path);
//! save_config(&config, &path)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::EngineConfig;
pub use io::{load_config, load_engine_config, read_config, save_config};
pub use paths::{default_config_dir, default_config_path};
