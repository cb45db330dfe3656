use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-level errors for the transcription pipeline.
///
/// Payloads are plain strings so the error can be cloned and handed to every
/// caller waiting on a shared operation (see `ServerSupervisor::start`).
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Binary not found: {role} (searched: {searched})")]
    BinaryNotFound { role: String, searched: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model file {path} is too small ({size} bytes, expected at least {min} bytes)")]
    ModelInvalid { path: String, size: u64, min: u64 },

    #[error("Audio recording too small ({size} bytes, expected at least {min} bytes)")]
    InputTooSmall { size: usize, min: usize },

    #[error("Audio conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Inference server did not become ready within {secs}s")]
    ProcessStartTimeout { secs: u64 },

    #[error("Process exited unexpectedly (exit code {}): {diagnostics}", exit_code(.code))]
    ProcessCrashed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Inference server is not ready")]
    NotReady,

    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("Could not parse transcription response: {0}")]
    ResponseParse(String),

    #[error("No audio detected")]
    NoAudioDetected,

    #[error("Reasoning failed: {0}")]
    Reasoning(String),

    #[error("{primary_backend} failed: {primary}; {fallback_backend} fallback failed: {fallback}")]
    FallbackExhausted {
        primary_backend: String,
        primary: Box<DomainError>,
        fallback_backend: String,
        fallback: Box<DomainError>,
    },
}

/// Flat classification of a failure, carried by `TranscriptionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    Io,
    BinaryNotFound,
    ModelNotFound,
    ModelInvalid,
    InputTooSmall,
    ConversionFailed,
    ProcessStartTimeout,
    ProcessCrashed,
    NotReady,
    NetworkError,
    ResponseParseError,
    NoAudioDetected,
    ReasoningFailed,
}

impl DomainError {
    /// Classify this error.
    ///
    /// A failed fallback reports the kind of the primary failure; the message
    /// still names both causes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Config(_) => ErrorKind::Configuration,
            DomainError::Serialization(_) | DomainError::Io(_) => ErrorKind::Io,
            DomainError::BinaryNotFound { .. } => ErrorKind::BinaryNotFound,
            DomainError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            DomainError::ModelInvalid { .. } => ErrorKind::ModelInvalid,
            DomainError::InputTooSmall { .. } => ErrorKind::InputTooSmall,
            DomainError::ConversionFailed(_) => ErrorKind::ConversionFailed,
            DomainError::ProcessStartTimeout { .. } => ErrorKind::ProcessStartTimeout,
            DomainError::ProcessCrashed { .. } => ErrorKind::ProcessCrashed,
            DomainError::NotReady => ErrorKind::NotReady,
            DomainError::Network(_) => ErrorKind::NetworkError,
            DomainError::ResponseParse(_) => ErrorKind::ResponseParseError,
            DomainError::NoAudioDetected => ErrorKind::NoAudioDetected,
            DomainError::Reasoning(_) => ErrorKind::ReasoningFailed,
            DomainError::FallbackExhausted { primary, .. } => primary.kind(),
        }
    }

    /// `NoAudioDetected` is a valid terminal outcome, not a pipeline failure.
    pub fn is_no_audio(&self) -> bool {
        matches!(self, DomainError::NoAudioDetected)
    }
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
