use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, ModelReference, NormalizedAudio, Transcript};

/// Configuration for transcription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscribeConfig {
    /// Target language (ISO 639-1 code, e.g., "en", "fr").
    /// None for auto-detection.
    pub language: Option<String>,
    /// Number of threads to use (0 = auto).
    pub threads: u32,
    /// Model for local backends. Cloud backends use their configured model.
    pub model: Option<ModelReference>,
}

/// Port for transcription operations.
///
/// Implementations handle the actual transcription using different backends
/// (supervised inference server, one-shot CLI, stdio daemon, cloud API).
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a canonical WAV file to text.
    ///
    /// An empty transcript is reported as `DomainError::NoAudioDetected`.
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        config: &TranscribeConfig,
    ) -> Result<Transcript, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcribe_config_default() {
        let config = TranscribeConfig::default();
        assert!(config.language.is_none());
        assert!(config.model.is_none());
        assert_eq!(config.threads, 0);
    }
}
