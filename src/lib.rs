//! Local-first speech transcription.
//!
//! Supervises a local inference server, normalizes recordings into the
//! canonical WAV format and falls back between the local and cloud backends.

pub mod adapters;
pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use app::{AppController, FallbackOrchestrator};
pub use domain::{DomainError, TranscriptionResult, TranscriptionSource};
