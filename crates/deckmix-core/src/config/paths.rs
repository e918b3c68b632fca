//! Path utilities for deckmix configuration files

use std::path::PathBuf;

/// Directory holding deckmix configuration
///
/// Returns: `{config_dir}/deckmix` (e.g. `~/.config/deckmix` on Linux),
/// or `./deckmix` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deckmix")
}

/// Get the default config file path
///
/// # Arguments
/// * `filename` - Config file name (e.g., "engine.yaml")
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_deckmix() {
        assert!(default_config_dir().ends_with("deckmix"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("engine.yaml");
        assert!(path.ends_with("deckmix/engine.yaml"));
    }
}
