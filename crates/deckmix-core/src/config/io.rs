//! YAML configuration loading and saving

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::EngineConfig;

/// Read and parse a YAML config file
///
/// Returns `Ok(None)` when the file doesn't exist.
pub fn read_config<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(Some(config))
}

/// Load a config file, falling back to defaults
///
/// A missing file is normal (first run). An unreadable or invalid file is
/// logged and also yields defaults, so a bad edit never stops the engine.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match read_config(path) {
        Ok(Some(config)) => {
            log::info!("load_config: loaded {:?}", path);
            config
        }
        Ok(None) => {
            log::info!("load_config: {:?} not found, using defaults", path);
            T::default()
        }
        Err(e) => {
            log::warn!("load_config: {:#}, using defaults", e);
            T::default()
        }
    }
}

/// Load an engine config and clamp it into a usable range
pub fn load_engine_config(path: &Path) -> EngineConfig {
    load_config::<EngineConfig>(path).validated()
}

/// Save a config file as YAML, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: wrote {:?}", path);
    Ok(())
}
