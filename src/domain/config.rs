use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::transcription::{Backend, ModelReference};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// Backend selection and fallback policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Primary backend: "local" or "cloud".
    pub mode: Backend,
    /// Language code (e.g., "en", "fr", "auto").
    pub language: String,
    /// Retry on the cloud once when local transcription fails.
    pub fallback_to_cloud: bool,
    /// Retry locally once when cloud transcription fails.
    pub fallback_to_local: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            mode: Backend::Local,
            language: "auto".to_string(),
            fallback_to_cloud: false,
            fallback_to_local: false,
        }
    }
}

/// How local inference is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalEngine {
    /// Long-running supervised inference server.
    Server,
    /// One command-line invocation per request.
    Cli,
    /// Long-running interpreter speaking JSON lines over stdio.
    Daemon,
}

/// Stdio inference daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Interpreter for the script. Searched like the other binaries when unset.
    pub interpreter: Option<PathBuf>,
    /// Daemon script, required by the daemon engine.
    pub script: Option<PathBuf>,
    /// Model name handed to the daemon (not a local file).
    pub model: String,
    /// Model loading happens before the ready line and can be slow.
    pub startup_timeout_ms: u64,
    pub ping_timeout_ms: u64,
    pub request_timeout_secs: u64,
    /// Time between the exit command and a forced kill.
    pub stop_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            script: None,
            model: "nvidia/nemotron-speech-streaming-en-0.6b".to_string(),
            startup_timeout_ms: 120_000,
            ping_timeout_ms: 2_000,
            request_timeout_secs: 300,
            stop_grace_ms: 5_000,
        }
    }
}

impl DaemonConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Local inference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub engine: LocalEngine,
    /// Selected model name (e.g., "base", "small").
    pub model: String,
    /// Explicit model file. Defaults to `<data_dir>/models/ggml-<model>.bin`.
    pub model_path: Option<PathBuf>,
    /// Smaller files are treated as truncated downloads.
    pub min_model_bytes: u64,
    /// Number of threads to use (0 = auto).
    pub threads: u32,
    /// Application resource directory containing bundled `bin/` executables.
    pub resource_dir: Option<PathBuf>,
    pub server_binary: Option<PathBuf>,
    pub cli_binary: Option<PathBuf>,
    pub converter_binary: Option<PathBuf>,
    /// Timeout for one-shot CLI transcription.
    pub cli_timeout_secs: u64,
    pub daemon: DaemonConfig,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            engine: LocalEngine::Server,
            model: "base".to_string(),
            model_path: None,
            min_model_bytes: 1024 * 1024,
            threads: 0,
            resource_dir: None,
            server_binary: None,
            cli_binary: None,
            converter_binary: None,
            cli_timeout_secs: 300,
            daemon: DaemonConfig::default(),
        }
    }
}

impl LocalConfig {
    /// Model file for the selected model.
    pub fn model_reference(&self, data_dir: &std::path::Path) -> ModelReference {
        let path = self.model_path.clone().unwrap_or_else(|| {
            data_dir
                .join("models")
                .join(format!("ggml-{}.bin", self.model))
        });
        ModelReference::new(self.model.clone(), path, self.min_model_bytes)
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.cli_timeout_secs)
    }
}

/// Inference server supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// First port of the scanned range (inclusive).
    pub port_range_start: u16,
    /// Last port of the scanned range (inclusive).
    pub port_range_end: u16,
    pub startup_timeout_ms: u64,
    /// Liveness polling interval while starting.
    pub startup_poll_ms: u64,
    /// Steady-state health check interval.
    pub health_interval_ms: u64,
    /// Consecutive failed checks before the server is marked degraded.
    pub health_failure_threshold: u32,
    /// Time between the termination signal and a forced kill.
    pub stop_grace_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port_range_start: 8178,
            port_range_end: 8199,
            startup_timeout_ms: 30_000,
            startup_poll_ms: 100,
            health_interval_ms: 5_000,
            health_failure_threshold: 3,
            stop_grace_ms: 5_000,
            request_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_ms.max(1))
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Audio normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Smaller recordings are rejected as failed recordings.
    pub min_input_bytes: usize,
    pub conversion_timeout_ms: u64,
    /// Where per-request scratch directories are created (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            min_input_bytes: 1_000,
            conversion_timeout_ms: 30_000,
            temp_dir: None,
        }
    }
}

impl AudioConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_millis(self.conversion_timeout_ms)
    }
}

/// Cloud transcription API (OpenAI compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub base_url: String,
    pub model: String,
    /// API key. Falls back to the `OPENAI_API_KEY` environment variable.
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            api_key: None,
            request_timeout_secs: 120,
        }
    }
}

impl CloudConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Post-processing of transcripts by the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub enabled: bool,
    pub model_id: String,
    pub agent_name: String,
    pub provider: String,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_id: "gpt-4o-mini".to_string(),
            agent_name: "Assistant".to_string(),
            provider: "openai".to_string(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub transcription: TranscriptionConfig,
    pub local: LocalConfig,
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub cloud: CloudConfig,
    pub reasoning: ReasoningConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze the settings that drive a single request.
    pub fn transcription_options(&self, data_dir: &std::path::Path) -> TranscriptionOptions {
        let language = match self.transcription.language.trim() {
            "" | "auto" => None,
            code => Some(code.to_string()),
        };

        let reasoning = self.reasoning.enabled.then(|| ReasoningRequest {
            model_id: self.reasoning.model_id.clone(),
            agent_name: self.reasoning.agent_name.clone(),
            provider: self.reasoning.provider.clone(),
        });

        TranscriptionOptions {
            mode: self.transcription.mode,
            fallback_to_cloud: self.transcription.fallback_to_cloud,
            fallback_to_local: self.transcription.fallback_to_local,
            language,
            threads: self.local.threads,
            model: Some(self.local.model_reference(data_dir)),
            reasoning,
        }
    }
}

/// Parameters for the reasoning pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub model_id: String,
    pub agent_name: String,
    pub provider: String,
}

/// Immutable per-request snapshot of the settings.
///
/// Taken once when a request starts so a preference change cannot affect a
/// request halfway through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOptions {
    pub mode: Backend,
    pub fallback_to_cloud: bool,
    pub fallback_to_local: bool,
    pub language: Option<String>,
    pub threads: u32,
    pub model: Option<ModelReference>,
    /// None disables the reasoning pass.
    pub reasoning: Option<ReasoningRequest>,
}

impl TranscriptionOptions {
    /// Whether a failure of `primary` may be retried on the opposite backend.
    pub fn fallback_enabled(&self, primary: Backend) -> bool {
        match primary {
            Backend::Local => self.fallback_to_cloud,
            Backend::Cloud => self.fallback_to_local,
        }
    }
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            mode: Backend::Local,
            fallback_to_cloud: false,
            fallback_to_local: false,
            language: None,
            threads: 0,
            model: None,
            reasoning: None,
        }
    }
}
