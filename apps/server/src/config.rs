//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WS server to.
    /// Override: `AIRCHECK_BIND_PORT`
    pub bind_port: u16,

    /// How long the engine and the store may be unreachable at startup
    /// before the process gives up (seconds).
    pub startup_grace_secs: u64,

    /// Coordination core settings (engine endpoints, storage, DJ pipeline,
    /// provider tiers); see `aircheck_core::Config`.
    #[serde(flatten)]
    pub core: aircheck_core::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 8171,
            startup_grace_secs: 20,
            core: aircheck_core::Config::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AIRCHECK_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("AIRCHECK_ENGINE_HOST") {
            if !val.is_empty() {
                self.core.engine.control_host = val;
            }
        }

        if let Ok(val) = std::env::var("AIRCHECK_ENGINE_PORT") {
            if let Ok(port) = val.parse() {
                self.core.engine.control_port = port;
            }
        }

        // Note: AIRCHECK_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Re-roots all storage paths under a single data directory.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.core.store.db_path = data_dir.join("aircheck.db");
        self.core.store.tts_dir = data_dir.join("tts");
        self.core.store.artwork_dir = data_dir.join("artwork");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = ServerConfig::default();
        assert!(config.core.validate().is_ok());
        assert_eq!(config.bind_port, 8171);
    }

    #[test]
    fn yaml_sections_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "bind_port: 9000\nengine:\n  control_port: 4321\n  queue: djq\ndj:\n  delay_ms: 10000\n",
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.core.engine.control_port, 4321);
        assert_eq!(config.core.engine.queue, "djq");
        assert_eq!(config.core.dj.delay_ms, 10_000);
        // Untouched sections keep their defaults.
        assert_eq!(config.core.snapshot.tick_interval_secs, 3);
    }

    #[test]
    fn data_dir_reroots_storage_paths() {
        let mut config = ServerConfig::default();
        config.set_data_dir(PathBuf::from("/var/lib/aircheck"));
        assert_eq!(
            config.core.store.db_path,
            PathBuf::from("/var/lib/aircheck/aircheck.db")
        );
        assert_eq!(
            config.core.store.tts_dir,
            PathBuf::from("/var/lib/aircheck/tts")
        );
    }
}
