use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{AppConfig, DomainError};
use crate::ports::ConfigStore;

const APP_DIR: &str = "voxflow";

/// TOML configuration file plus the directories the pipeline writes to.
pub struct TomlConfigStore {
    config_dir: PathBuf,
    data_dir: PathBuf,
    logs_dir: PathBuf,
}

impl TomlConfigStore {
    /// Use the OS-specific application directories.
    /// - Linux: `~/.config/voxflow/`, models and logs under `~/.local/share/voxflow/`
    /// - macOS: `~/Library/Application Support/voxflow/` for everything
    /// - Windows: `%APPDATA%\voxflow\`, logs under `%LOCALAPPDATA%\voxflow\logs\`
    pub fn new() -> Result<Self, DomainError> {
        let config_dir = match dirs::config_dir() {
            Some(dir) => dir.join(APP_DIR),
            None => {
                let message = "Could not find configuration directory".to_string();
                return Err(DomainError::Config(message));
            }
        };
        let data_dir = dirs::data_dir()
            .map(|p| p.join(APP_DIR))
            .unwrap_or_else(|| config_dir.clone());
        let logs_dir = dirs::data_local_dir()
            .map(|p| p.join(APP_DIR).join("logs"))
            .unwrap_or_else(|| data_dir.join("logs"));

        Self::with_dirs(config_dir, data_dir, logs_dir)
    }

    /// Keep configuration, data and logs under one root directory.
    pub fn at(root: &Path) -> Result<Self, DomainError> {
        Self::with_dirs(root.to_path_buf(), root.to_path_buf(), root.join("logs"))
    }

    fn with_dirs(
        config_dir: PathBuf,
        data_dir: PathBuf,
        logs_dir: PathBuf,
    ) -> Result<Self, DomainError> {
        fs::create_dir_all(&config_dir)?;
        fs::create_dir_all(&data_dir)?;

        debug!(config_dir = ?config_dir, data_dir = ?data_dir, "ConfigStore initialized");

        Ok(Self {
            config_dir,
            data_dir,
            logs_dir,
        })
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, DomainError> {
        let config_path = self.config_path();

        if config_path.exists() {
            debug!(path = ?config_path, "Loading configuration");
            let content = fs::read_to_string(&config_path)?;
            let config: AppConfig = toml::from_str(&content)?;
            info!(path = ?config_path, "Configuration loaded");
            Ok(config)
        } else {
            info!(path = ?config_path, "Configuration file not found, creating default");
            let config = AppConfig::new();
            self.save(&config)?;
            Ok(config)
        }
    }

    fn save(&self, config: &AppConfig) -> Result<(), DomainError> {
        let config_path = self.config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&config_path, toml::to_string_pretty(config)?)?;

        info!(path = ?config_path, "Configuration saved");
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    fn logs_dir(&self) -> PathBuf {
        self.logs_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Backend, LocalEngine};

    #[test]
    fn test_paths_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(dir.path()).unwrap();

        assert_eq!(store.config_path(), dir.path().join("config.toml"));
        assert_eq!(store.models_dir(), dir.path().join("models"));
        assert!(store.logs_dir().ends_with("logs"));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(dir.path()).unwrap();

        let config = store.load().unwrap();
        assert!(store.config_path().exists());
        assert_eq!(config.transcription.mode, Backend::Local);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(dir.path()).unwrap();

        let mut config = AppConfig::new();
        config.transcription.mode = Backend::Cloud;
        config.transcription.fallback_to_local = true;
        config.local.engine = LocalEngine::Cli;
        config.server.port_range_start = 9100;
        config.logging.level = "debug".to_string();
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.transcription.mode, Backend::Cloud);
        assert!(loaded.transcription.fallback_to_local);
        assert_eq!(loaded.local.engine, LocalEngine::Cli);
        assert_eq!(loaded.server.port_range_start, 9100);
        assert_eq!(loaded.logging.level, "debug");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(dir.path()).unwrap();
        let contents = "[transcription]\nfallback_to_cloud = true\n";
        fs::write(store.config_path(), contents).unwrap();

        let config = store.load().unwrap();
        assert!(config.transcription.fallback_to_cloud);
        assert_eq!(config.server.health_failure_threshold, 3);
        assert_eq!(config.audio.min_input_bytes, 1000);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlConfigStore::at(dir.path()).unwrap();
        fs::write(store.config_path(), "[server\nport = ").unwrap();

        assert!(matches!(store.load(), Err(DomainError::Config(_))));
    }
}
