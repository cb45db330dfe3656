use std::path::PathBuf;

use crate::domain::{AppConfig, DomainError};

/// Settings source for the pipeline.
///
/// Callers read a full `AppConfig` once and derive an immutable
/// `TranscriptionOptions` snapshot per request from it.
pub trait ConfigStore: Send + Sync {
    /// Load configuration, creating the default file if none exists.
    fn load(&self) -> Result<AppConfig, DomainError>;

    fn save(&self, config: &AppConfig) -> Result<(), DomainError>;

    fn config_path(&self) -> PathBuf;

    /// Application data directory (models live under `models/`).
    fn data_dir(&self) -> PathBuf;

    fn logs_dir(&self) -> PathBuf;

    fn models_dir(&self) -> PathBuf {
        self.data_dir().join("models")
    }
}
