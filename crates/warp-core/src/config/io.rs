//! YAML configuration loading and saving
//!
//! Loading never fails: a missing or unreadable file yields the type's
//! defaults, so a broken config can't stop the pipeline from starting.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file
///
/// Missing file → defaults (info). Unreadable or unparsable file →
/// defaults (warn). Fields absent from the file take their defaults when
/// `T` is `#[serde(default)]`.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("Failed to read config {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Failed to parse config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file
///
/// Parent directories are created as needed. The YAML is written to a
/// sibling temp file first and renamed over the target, so a crash never
/// leaves a half-written config behind.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move config into place at {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClockConfig, RemoteConfig};

    #[test]
    fn test_missing_file_gives_defaults() {
        let clock: ClockConfig = load_config(Path::new("/nonexistent/warp/clock.yaml"));
        assert_eq!(clock, ClockConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.yaml");
        let remote = RemoteConfig {
            base_url: "http://stretch.local:9000".to_string(),
            max_retries: 5,
            ..RemoteConfig::default()
        };

        save_config(&remote, &path).unwrap();
        let loaded: RemoteConfig = load_config(&path);

        assert_eq!(loaded, remote);
        assert!(!path.with_extension("yaml.tmp").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.yaml");
        std::fs::write(&path, "drift_threshold_ms: 20\n").unwrap();

        let clock: ClockConfig = load_config(&path);
        assert_eq!(clock.drift_threshold_ms, 20);
        assert_eq!(clock.drift_check_interval_ms, ClockConfig::default().drift_check_interval_ms);
    }

    #[test]
    fn test_unparsable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.yaml");
        std::fs::write(&path, "drift_threshold_ms: [20, 30").unwrap();

        let clock: ClockConfig = load_config(&path);
        assert_eq!(clock, ClockConfig::default());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warp").join("profiles").join("clock.yaml");

        save_config(&ClockConfig::default(), &path).unwrap();
        assert!(path.exists());
    }
}
