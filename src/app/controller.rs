use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::{
    AudioNormalizer, BinaryResolver, CliTranscriber, CloudTranscriber, DaemonTranscriber,
    DeviceReport, HttpHealthCheck, LocalTranscriber, ServerSupervisor, ServerTranscriber,
    TokioProcessLauncher, TomlConfigStore,
};
use crate::app::FallbackOrchestrator;
use crate::domain::{
    AppConfig, AudioBuffer, AudioContainer, DomainError, EventBus, PipelineEvent, ServerStatus,
    TranscriptionOptions, TranscriptionResult,
};
use crate::infrastructure::init_logging;
use crate::ports::{ConfigStore, ProcessLauncher, ReasoningService};

/// Timeout of a single liveness check.
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Wires configuration, logging and the pipeline components together.
pub struct AppController {
    config: RwLock<AppConfig>,
    config_store: Arc<dyn ConfigStore>,
    events: EventBus,
    supervisor: ServerSupervisor,
    daemon: Arc<DaemonTranscriber>,
    orchestrator: FallbackOrchestrator,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Load configuration, start logging and build the pipeline.
    ///
    /// `root` keeps every file under one directory instead of the OS
    /// defaults.
    pub fn new(root: Option<&Path>) -> Result<Self, DomainError> {
        let store: Arc<dyn ConfigStore> = match root {
            Some(root) => Arc::new(TomlConfigStore::at(root)?),
            None => Arc::new(TomlConfigStore::new()?),
        };
        let config = store.load()?;
        let log_guard = init_logging(&store.logs_dir(), &config.logging)?;

        info!(config = ?store.config_path(), "voxflow starting up");

        let mut controller = Self::from_parts(store, config)?;
        controller._log_guard = log_guard;
        Ok(controller)
    }

    /// Build the pipeline without touching the global logger.
    pub fn from_parts(
        config_store: Arc<dyn ConfigStore>,
        config: AppConfig,
    ) -> Result<Self, DomainError> {
        let events = EventBus::default();
        let resolver = Arc::new(BinaryResolver::from_config(&config.local));
        let launcher: Arc<dyn ProcessLauncher> = Arc::new(TokioProcessLauncher::new());

        let supervisor = ServerSupervisor::new(
            launcher.clone(),
            Arc::new(HttpHealthCheck::new(LIVENESS_TIMEOUT)?),
            resolver.clone(),
            config.server.clone(),
            events.clone(),
        );
        let daemon_config = config.local.daemon.clone();
        let daemon = Arc::new(DaemonTranscriber::new(launcher, resolver.clone(), daemon_config));
        let server = ServerTranscriber::new(supervisor.clone(), config.server.request_timeout())?;
        let local = LocalTranscriber::new(
            config.local.engine,
            supervisor.clone(),
            server,
            CliTranscriber::new(resolver.clone(), config.local.cli_timeout()),
            daemon.clone(),
        );
        let cloud = CloudTranscriber::new(&config.cloud)?;
        let normalizer = AudioNormalizer::new(resolver, config.audio.clone(), events.clone());
        let orchestrator = FallbackOrchestrator::new(
            normalizer,
            Arc::new(local),
            Arc::new(cloud),
            events.clone(),
        );

        info!(
            mode = %config.transcription.mode,
            engine = ?config.local.engine,
            fallback_to_cloud = config.transcription.fallback_to_cloud,
            fallback_to_local = config.transcription.fallback_to_local,
            "AppController initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            config_store,
            events,
            supervisor,
            daemon,
            orchestrator,
            _log_guard: None,
        })
    }

    /// Attach the text post-processing service.
    pub fn with_reasoning(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.orchestrator = self.orchestrator.with_reasoning(service);
        self
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Persist a new configuration.
    ///
    /// Settings snapshotted per request (mode, language, fallback flags,
    /// threads, model, reasoning) apply from the next request. Engine, server,
    /// audio, cloud and binary settings are read when the controller is built
    /// and take effect only after it is rebuilt.
    pub fn update_config(&self, config: AppConfig) -> Result<(), DomainError> {
        self.config_store.save(&config)?;
        *self.config.write() = config;
        info!("Configuration updated");
        Ok(())
    }

    /// Snapshot of the settings for one request.
    pub fn transcription_options(&self) -> TranscriptionOptions {
        let config = self.config.read();
        config.transcription_options(&self.config_store.data_dir())
    }

    /// Transcribe a recording held in memory.
    pub async fn transcribe(
        &self,
        buffer: AudioBuffer,
        options: &TranscriptionOptions,
    ) -> TranscriptionResult {
        self.orchestrator
            .normalize_and_transcribe(buffer, options)
            .await
    }

    /// Transcribe an audio file. The extension is used as a container hint.
    pub async fn transcribe_file(
        &self,
        path: &Path,
        options: &TranscriptionOptions,
    ) -> Result<TranscriptionResult, DomainError> {
        let bytes = tokio::fs::read(path).await?;
        let buffer = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => AudioBuffer::with_container(bytes, AudioContainer::from_hint(ext), 0.0),
            None => AudioBuffer::new(bytes, 0.0),
        };
        info!(path = ?path, bytes = buffer.len(), "Transcribing file");
        Ok(self.transcribe(buffer, options).await)
    }

    pub fn server_status(&self) -> ServerStatus {
        self.supervisor.status()
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.supervisor
    }

    /// Run the daemon script's device check.
    pub async fn check_device(&self) -> Result<DeviceReport, DomainError> {
        self.daemon.check_device().await
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Stop the inference server and daemon if running.
    pub async fn shutdown(&self) {
        self.supervisor.stop().await;
        self.daemon.stop().await;
        info!("voxflow shut down");
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config_store.data_dir()
    }

    pub fn models_dir(&self) -> PathBuf {
        self.config_store.models_dir()
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.config_store.logs_dir()
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_store.config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::audio_normalizer::tests::wav_bytes;
    use crate::domain::{Backend, ErrorKind, LocalEngine, ServerState};

    fn controller(dir: &Path) -> AppController {
        let store = Arc::new(TomlConfigStore::at(dir).unwrap());
        let mut config = AppConfig::new();
        config.local.server_binary = Some(dir.join("missing-whisper-server"));
        config.audio.temp_dir = Some(dir.join("scratch"));
        AppController::from_parts(store, config).unwrap()
    }

    #[test]
    fn test_options_use_data_dir_for_models() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());

        let options = controller.transcription_options();
        assert_eq!(options.mode, Backend::Local);
        let model = options.model.unwrap();
        let expected = controller.models_dir().join("ggml-base.bin");
        assert_eq!(model.file_path, expected);
    }

    #[test]
    fn test_update_config_persists() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());

        let mut config = controller.config();
        config.transcription.language = "de".to_string();
        config.local.model = "small".to_string();
        controller.update_config(config).unwrap();

        let options = controller.transcription_options();
        assert_eq!(options.language.as_deref(), Some("de"));
        let model = options.model.unwrap();
        assert!(model.file_path.ends_with("ggml-small.bin"));
        let saved = std::fs::read_to_string(controller.config_path()).unwrap();
        assert!(saved.contains("language = \"de\""));
    }

    #[test]
    fn test_status_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());

        let status = controller.server_status();
        assert_eq!(status.state, ServerState::Stopped);
        assert!(!status.running);
        assert_eq!(status.port, None);
    }

    #[tokio::test]
    async fn test_missing_model_reported_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());
        let wav = dir.path().join("speech.wav");
        std::fs::write(&wav, wav_bytes(16_000, 1, 0.5)).unwrap();

        let options = controller.transcription_options();
        let result = controller.transcribe_file(&wav, &options).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ModelNotFound));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path());
        let missing = dir.path().join("nope.webm");

        let options = controller.transcription_options();
        let err = controller.transcribe_file(&missing, &options).await;
        assert!(matches!(err, Err(DomainError::Io(_))));
    }

    #[tokio::test]
    async fn test_daemon_engine_without_script_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TomlConfigStore::at(dir.path()).unwrap());
        let mut config = AppConfig::new();
        config.local.engine = LocalEngine::Daemon;
        config.audio.temp_dir = Some(dir.path().join("scratch"));
        let controller = AppController::from_parts(store, config).unwrap();
        let wav = dir.path().join("speech.wav");
        std::fs::write(&wav, wav_bytes(16_000, 1, 0.5)).unwrap();

        let options = controller.transcription_options();
        let result = controller.transcribe_file(&wav, &options).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));

        let err = controller.check_device().await.unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
        controller.shutdown().await;
    }
}
