use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::cli_transcriber::CliTranscriber;
use crate::adapters::daemon_transcriber::DaemonTranscriber;
use crate::adapters::server_supervisor::ServerSupervisor;
use crate::adapters::server_transcriber::ServerTranscriber;
use crate::domain::{
    DomainError, LocalEngine, ModelReference, NormalizedAudio, ServerOptions, Transcript,
};
use crate::ports::{TranscribeConfig, Transcriber};

/// The local backend: validates the model, then runs the configured engine.
///
/// The daemon engine names its model itself, so no model file is checked.
pub struct LocalTranscriber {
    engine: LocalEngine,
    supervisor: ServerSupervisor,
    server: ServerTranscriber,
    cli: CliTranscriber,
    daemon: Arc<DaemonTranscriber>,
}

impl LocalTranscriber {
    pub fn new(
        engine: LocalEngine,
        supervisor: ServerSupervisor,
        server: ServerTranscriber,
        cli: CliTranscriber,
        daemon: Arc<DaemonTranscriber>,
    ) -> Self {
        Self {
            engine,
            supervisor,
            server,
            cli,
            daemon,
        }
    }

    /// Make sure a server for `config` is ready, starting or restarting it.
    async fn warm_server(&self, config: &TranscribeConfig) -> Result<u16, DomainError> {
        let model = required_model(config)?;
        let options = ServerOptions {
            threads: config.threads,
            language: config.language.clone(),
        };
        debug!(model = %model.id, state = ?self.supervisor.state(), "Warming inference server");
        self.supervisor.start(&model.file_path, &options).await
    }
}

fn required_model(config: &TranscribeConfig) -> Result<&ModelReference, DomainError> {
    match &config.model {
        Some(model) => Ok(model),
        None => {
            let message = "No model configured for local transcription".to_string();
            Err(DomainError::Config(message))
        }
    }
}

fn validated_model(config: &TranscribeConfig) -> Result<&ModelReference, DomainError> {
    let model = required_model(config)?;
    model.validate()?;
    Ok(model)
}

#[async_trait]
impl Transcriber for LocalTranscriber {
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        config: &TranscribeConfig,
    ) -> Result<Transcript, DomainError> {
        debug!(engine = ?self.engine, "Local transcription");
        match self.engine {
            LocalEngine::Server => {
                validated_model(config)?;
                self.warm_server(config).await?;
                self.server.transcribe(audio, config).await
            }
            LocalEngine::Cli => {
                validated_model(config)?;
                self.cli.transcribe(audio, config).await
            }
            LocalEngine::Daemon => self.daemon.transcribe(audio, config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::binary_resolver::{BinaryResolver, BinaryRole};
    use crate::adapters::server_supervisor::tests::{fast_config, FakeLauncher, FakeCheck, Fixture};
    use crate::domain::config::DaemonConfig;
    use crate::domain::EventBus;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn local(
        fixture: &Fixture,
        launcher: Arc<FakeLauncher>,
        engine: LocalEngine,
    ) -> (LocalTranscriber, ServerSupervisor) {
        let supervisor = ServerSupervisor::new(
            launcher.clone(),
            FakeCheck::new(true),
            fixture.resolver(),
            fast_config(),
            EventBus::default(),
        );
        let resolver = Arc::new(
            BinaryResolver::new(None)
                .with_override(BinaryRole::Cli, fixture.dir.path().join("no-cli"))
                .with_search_path("")
                .without_well_known_dirs(),
        );
        let timeout = Duration::from_secs(1);
        let daemon = DaemonTranscriber::new(launcher, resolver.clone(), DaemonConfig::default());
        let transcriber = LocalTranscriber::new(
            engine,
            supervisor.clone(),
            ServerTranscriber::new(supervisor.clone(), timeout).unwrap(),
            CliTranscriber::new(resolver, timeout),
            Arc::new(daemon),
        );
        (transcriber, supervisor)
    }

    fn audio(fixture: &Fixture) -> NormalizedAudio {
        let dir = tempfile::tempdir_in(fixture.dir.path()).unwrap();
        let path = dir.path().join("audio.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        NormalizedAudio::new(dir, path, Vec::new(), false, 1.0)
    }

    fn with_model(model: ModelReference) -> TranscribeConfig {
        TranscribeConfig {
            model: Some(model),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_model_fails_without_spawning() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let (transcriber, _) = local(&fixture, launcher.clone(), LocalEngine::Server);
        let missing = fixture.dir.path().join("missing.bin");
        let config = with_model(ModelReference::new("base", missing, 1));

        let err = transcriber.transcribe(&audio(&fixture), &config).await;
        assert!(matches!(err, Err(DomainError::ModelNotFound(_))));
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_truncated_model_is_invalid() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let (transcriber, _) = local(&fixture, launcher, LocalEngine::Cli);
        let min_bytes = 10 * 1024 * 1024;
        let config = with_model(ModelReference::new("base", fixture.model.clone(), min_bytes));

        let err = transcriber.transcribe(&audio(&fixture), &config).await;
        assert!(matches!(err, Err(DomainError::ModelInvalid { .. })));
    }

    #[tokio::test]
    async fn test_no_model_is_configuration_error() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let (transcriber, _) = local(&fixture, launcher, LocalEngine::Server);
        let config = TranscribeConfig::default();

        let err = transcriber.transcribe(&audio(&fixture), &config).await;
        assert!(matches!(err, Err(DomainError::Config(_))));
    }

    #[tokio::test]
    async fn test_server_is_warmed_once() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let (transcriber, supervisor) = local(&fixture, launcher.clone(), LocalEngine::Server);
        let config = with_model(ModelReference::new("base", fixture.model.clone(), 1));

        let first = transcriber.warm_server(&config).await.unwrap();
        let second = transcriber.warm_server(&config).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 1);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_changed_threads_restart_server() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let (transcriber, supervisor) = local(&fixture, launcher.clone(), LocalEngine::Server);
        let mut config = with_model(ModelReference::new("base", fixture.model.clone(), 1));

        transcriber.warm_server(&config).await.unwrap();
        config.threads = 4;
        transcriber.warm_server(&config).await.unwrap();

        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 2);
        let specs = launcher.specs.lock().clone();
        assert_eq!(specs[1].flag_value("-t"), Some("4"));
        assert!(launcher.children.lock()[0].terminated.load(Ordering::SeqCst));

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_daemon_engine_needs_no_model_file() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let (transcriber, _) = local(&fixture, launcher.clone(), LocalEngine::Daemon);
        let missing = fixture.dir.path().join("missing.bin");
        let config = with_model(ModelReference::new("base", missing, 1));

        match transcriber.transcribe(&audio(&fixture), &config).await {
            Err(DomainError::Config(message)) => assert!(message.contains("daemon script")),
            other => panic!("expected a daemon configuration error, got {:?}", other),
        }
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 0);
    }
}
