//! Configuration for the FDP simulation kernel.
//!
//! This module handles configuration for the repository's sizing knobs and
//! the flight recorder's file/runtime behavior.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Entity-component repository sizing.
    pub repository: RepositoryConfig,

    /// Flight recorder configuration.
    pub recorder: RecorderConfig,
}

/// Repository sizing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Maximum number of live entity slots.
    pub max_entities: usize,

    /// Byte budget per committed chunk.
    pub chunk_bytes: usize,

    /// Maximum number of distinct component types.
    pub max_component_types: usize,

    /// Paranoid mode: operations on stale/null entity handles are hard
    /// errors instead of silent no-ops/false.
    pub paranoid: bool,
}

/// Flight recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Path to the `.fdp` recording file.
    pub path: PathBuf,

    /// Worker park timeout in milliseconds when idle.
    pub worker_park_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_entities: constants::MAX_ENTITIES,
            chunk_bytes: constants::CHUNK_BYTES,
            max_component_types: constants::MAX_COMPONENT_TYPES,
            paranoid: false,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./recording.fdp"),
            worker_park_timeout_ms: constants::WORKER_PARK_TIMEOUT_MS,
        }
    }
}

/// Load configuration from a TOML file, falling back to defaults when no
/// path is given or the file cannot be read.
pub fn load_config_or_default(path: Option<&str>) -> Config {
    match path {
        Some(p) => load_config(p).unwrap_or_else(|err| {
            tracing::warn!(path = p, error = %err, "failed to load config, using defaults");
            Config::default()
        }),
        None => Config::default(),
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&config_str)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.repository.max_entities, constants::MAX_ENTITIES);
        assert_eq!(cfg.repository.chunk_bytes, constants::CHUNK_BYTES);
        assert!(!cfg.repository.paranoid);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = load_config_or_default(Some("/nonexistent/path/does-not-exist.toml"));
        assert_eq!(cfg.repository.max_entities, constants::MAX_ENTITIES);
    }
}
