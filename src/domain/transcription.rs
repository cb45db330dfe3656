use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::{DomainError, ErrorKind};

/// The two transcription backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Local,
    Cloud,
}

impl Backend {
    /// The backend used when this one fails and fallback is enabled.
    pub fn opposite(&self) -> Backend {
        match self {
            Backend::Local => Backend::Cloud,
            Backend::Cloud => Backend::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced a successful transcript.
///
/// The `*Fallback` variants are named after the backend that was attempted
/// first: `LocalFallback` means local failed and the cloud produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptionSource {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "local-fallback")]
    LocalFallback,
    #[serde(rename = "cloud")]
    Cloud,
    #[serde(rename = "cloud-fallback")]
    CloudFallback,
}

impl TranscriptionSource {
    /// Source tag for a transcript that the primary backend produced.
    pub fn primary(backend: Backend) -> Self {
        match backend {
            Backend::Local => TranscriptionSource::Local,
            Backend::Cloud => TranscriptionSource::Cloud,
        }
    }

    /// Source tag for a transcript rescued by the opposite of `primary`.
    pub fn fallback_for(primary: Backend) -> Self {
        match primary {
            Backend::Local => TranscriptionSource::LocalFallback,
            Backend::Cloud => TranscriptionSource::CloudFallback,
        }
    }

    /// The backend that actually produced the text.
    pub fn producer(&self) -> Backend {
        match self {
            TranscriptionSource::Local | TranscriptionSource::CloudFallback => Backend::Local,
            TranscriptionSource::Cloud | TranscriptionSource::LocalFallback => Backend::Cloud,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            TranscriptionSource::LocalFallback | TranscriptionSource::CloudFallback
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionSource::Local => "local",
            TranscriptionSource::LocalFallback => "local-fallback",
            TranscriptionSource::Cloud => "cloud",
            TranscriptionSource::CloudFallback => "cloud-fallback",
        }
    }
}

impl std::fmt::Display for TranscriptionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `normalize_and_transcribe`, used uniformly by every caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub success: bool,
    pub text: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    /// Only set on success.
    pub source: Option<TranscriptionSource>,
}

impl TranscriptionResult {
    pub fn succeeded(text: String, source: TranscriptionSource) -> Self {
        Self {
            success: true,
            text: Some(text),
            error_kind: None,
            message: None,
            source: Some(source),
        }
    }

    pub fn failed(error: &DomainError) -> Self {
        Self {
            success: false,
            text: None,
            error_kind: Some(error.kind()),
            message: Some(error.to_string()),
            source: None,
        }
    }

    pub fn is_no_audio(&self) -> bool {
        self.error_kind == Some(ErrorKind::NoAudioDetected)
    }
}

/// A model file supplied by the model manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReference {
    pub id: String,
    pub file_path: PathBuf,
    pub min_valid_size_bytes: u64,
}

impl ModelReference {
    pub fn new(
        id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        min_valid_size_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            min_valid_size_bytes,
        }
    }

    /// Check that the file exists and is not truncated. No checksum is computed.
    pub fn validate(&self) -> Result<(), DomainError> {
        let metadata = std::fs::metadata(&self.file_path)
            .map_err(|_| DomainError::ModelNotFound(self.file_path.display().to_string()))?;

        if !metadata.is_file() {
            return Err(DomainError::ModelNotFound(self.file_path.display().to_string()));
        }

        if metadata.len() < self.min_valid_size_bytes {
            return Err(DomainError::ModelInvalid {
                path: self.file_path.display().to_string(),
                size: metadata.len(),
                min: self.min_valid_size_bytes,
            });
        }

        Ok(())
    }
}

/// Text returned by a backend, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub detected_language: Option<String>,
    pub duration_ms: u64,
}

/// Turn an empty or whitespace-only transcript into `NoAudioDetected`.
pub fn classify_transcript(transcript: Transcript) -> Result<Transcript, DomainError> {
    let trimmed = transcript.text.trim();
    if trimmed.is_empty() {
        return Err(DomainError::NoAudioDetected);
    }
    Ok(Transcript {
        text: trimmed.to_string(),
        ..transcript
    })
}
