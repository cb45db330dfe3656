pub mod audio_normalizer;
pub mod binary_resolver;
pub mod cli_transcriber;
pub mod cloud_transcriber;
pub mod config_store;
pub mod daemon_transcriber;
pub mod health_check;
pub mod local_transcriber;
pub mod multipart;
pub mod process_launcher;
pub mod server_supervisor;
pub mod server_transcriber;

pub use audio_normalizer::AudioNormalizer;
pub use binary_resolver::{BinaryResolver, BinaryRole};
pub use cli_transcriber::CliTranscriber;
pub use cloud_transcriber::CloudTranscriber;
pub use config_store::TomlConfigStore;
pub use daemon_transcriber::{DaemonTranscriber, DeviceReport};
pub use health_check::HttpHealthCheck;
pub use local_transcriber::LocalTranscriber;
pub use multipart::MultipartBody;
pub use process_launcher::TokioProcessLauncher;
pub use server_supervisor::ServerSupervisor;
pub use server_transcriber::ServerTranscriber;
