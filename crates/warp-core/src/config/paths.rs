//! Path utilities for warp configuration files

use std::path::PathBuf;

/// Directory holding warp's configuration files
///
/// Returns: `{config_dir}/warp` (e.g. `~/.config/warp` on Linux), or
/// `./warp` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warp")
}

/// Get the default config file path
///
/// # Arguments
/// * `filename` - Config file name (e.g., "config.yaml")
///
/// Returns: `{config_dir}/warp/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_warp() {
        assert!(default_config_dir().ends_with("warp"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("test.yaml");
        assert!(path.ends_with("warp/test.yaml"));
    }
}
