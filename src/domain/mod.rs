pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod platform;
pub mod server;
pub mod transcription;

pub use audio::{AudioBuffer, AudioContainer, NormalizedAudio};
pub use cache::TtlCache;
pub use config::{AppConfig, LocalEngine, ReasoningRequest, TranscriptionOptions};
pub use error::{DomainError, ErrorKind};
pub use events::{EventBus, PipelineEvent};
pub use platform::{CpuArch, OsType, Platform};
pub use server::{AtomicServerState, ServerOptions, ServerState, ServerStatus};
pub use transcription::{
    classify_transcript, Backend, ModelReference, Transcript, TranscriptionResult,
    TranscriptionSource,
};
