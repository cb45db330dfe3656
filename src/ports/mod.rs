pub mod config;
pub mod process;
pub mod reasoning;
pub mod transcriber;

pub use config::ConfigStore;
pub use process::{ExitInfo, HealthCheck, LaunchSpec, ManagedProcess, ProcessIo, ProcessLauncher};
pub use reasoning::ReasoningService;
pub use transcriber::{TranscribeConfig, Transcriber};
