use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::audio_normalizer::converter_dir;
use crate::adapters::binary_resolver::{BinaryResolver, BinaryRole};
use crate::domain::config::ServerConfig;
use crate::domain::{
    AtomicServerState, DomainError, EventBus, PipelineEvent, ServerOptions, ServerState,
    ServerStatus, TtlCache,
};
use crate::ports::{HealthCheck, LaunchSpec, ManagedProcess, ProcessLauncher};

/// How long the binary availability answer is trusted.
const AVAILABILITY_TTL: Duration = Duration::from_secs(30);

type StartFuture = Shared<BoxFuture<'static, Result<u16, DomainError>>>;

/// A start in progress and what it was asked to run.
struct PendingStart {
    model_path: PathBuf,
    options: ServerOptions,
    future: StartFuture,
}

impl PendingStart {
    fn serves(&self, model_path: &Path, options: &ServerOptions) -> bool {
        self.model_path == model_path && self.options == *options
    }
}

/// Where the current server listens and what it serves.
#[derive(Debug, Clone)]
struct ServerInfo {
    port: u16,
    model_path: PathBuf,
}

/// The process owned by the supervisor while it is up.
struct RunningServer {
    process: Box<dyn ManagedProcess>,
    info: ServerInfo,
    options: ServerOptions,
    health_task: JoinHandle<()>,
}

struct SupervisorInner {
    launcher: Arc<dyn ProcessLauncher>,
    check: Arc<dyn HealthCheck>,
    resolver: Arc<BinaryResolver>,
    config: ServerConfig,
    events: EventBus,
    state: AtomicServerState,
    /// Serializes start and stop.
    lifecycle: tokio::sync::Mutex<Option<RunningServer>>,
    /// Readable without waiting on `lifecycle`.
    current: Mutex<Option<ServerInfo>>,
    inflight: Mutex<Option<PendingStart>>,
    availability: Mutex<TtlCache<bool>>,
}

/// Owns the lifecycle of the local inference server.
///
/// At most one server process runs per supervisor. Concurrent `start` calls
/// for the same model and options share one in-flight start and all receive
/// its outcome. A start for anything else waits for the pending one, then
/// replaces it.
#[derive(Clone)]
pub struct ServerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ServerSupervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        check: Arc<dyn HealthCheck>,
        resolver: Arc<BinaryResolver>,
        config: ServerConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                launcher,
                check,
                resolver,
                config,
                events,
                state: AtomicServerState::default(),
                lifecycle: tokio::sync::Mutex::new(None),
                current: Mutex::new(None),
                inflight: Mutex::new(None),
                availability: Mutex::new(TtlCache::new(AVAILABILITY_TTL)),
            }),
        }
    }

    /// Start the server for `model_path`, returning its port.
    ///
    /// A no-op when already ready with the same model and options.
    pub async fn start(
        &self,
        model_path: &Path,
        options: &ServerOptions,
    ) -> Result<u16, DomainError> {
        loop {
            let (pending, joined) = self.join_or_begin(model_path, options);
            if joined {
                return pending.await;
            }
            debug!(model = ?model_path, "Waiting for in-flight start of another model");
            let _ = pending.await;
        }
    }

    /// The in-flight start to await, and whether it serves this request.
    fn join_or_begin(&self, model_path: &Path, options: &ServerOptions) -> (StartFuture, bool) {
        let mut inflight = self.inner.inflight.lock();
        if let Some(pending) = inflight.as_ref() {
            let joined = pending.serves(model_path, options);
            if joined {
                debug!("Joining in-flight server start");
            }
            return (pending.future.clone(), joined);
        }

        let inner = self.inner.clone();
        let task_model = model_path.to_path_buf();
        let task_options = options.clone();
        // Detached so a cancelled caller cannot abandon the other waiters.
        let task = tokio::spawn(async move {
            let result = inner.start_exclusive(&task_model, &task_options).await;
            *inner.inflight.lock() = None;
            result
        });
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(DomainError::Io(format!("Server start task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        *inflight = Some(PendingStart {
            model_path: model_path.to_path_buf(),
            options: options.clone(),
            future: future.clone(),
        });
        (future, true)
    }

    /// Stop the server. Waits for an in-flight start first.
    pub async fn stop(&self) {
        let pending = {
            let inflight = self.inner.inflight.lock();
            inflight.as_ref().map(|p| p.future.clone())
        };
        if let Some(pending) = pending {
            let _ = pending.await;
        }

        let mut running = self.inner.lifecycle.lock().await;
        if let Some(server) = running.take() {
            self.inner.shutdown(server).await;
        }
        self.inner.clear();
    }

    pub fn status(&self) -> ServerStatus {
        let available = self.binary_available();
        let state = self.inner.state.load();
        let current = self.inner.current.lock().clone();
        let model_name = current
            .as_ref()
            .and_then(|c| c.model_path.file_name())
            .map(|n| n.to_string_lossy().into_owned());

        ServerStatus {
            available,
            running: state.is_running(),
            state,
            port: current.as_ref().map(|c| c.port),
            model_name,
            model_path: current.map(|c| c.model_path),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.state.load()
    }

    /// Port of a server that is ready to take requests.
    pub fn ready_port(&self) -> Option<u16> {
        if !self.inner.state.load().is_ready() {
            return None;
        }
        self.inner.current.lock().as_ref().map(|c| c.port)
    }

    /// Model the running server was started with.
    pub fn current_model(&self) -> Option<PathBuf> {
        let current = self.inner.current.lock();
        current.as_ref().map(|c| c.model_path.clone())
    }

    fn binary_available(&self) -> bool {
        let resolver = &self.inner.resolver;
        let mut cache = self.inner.availability.lock();
        cache.get_or_refresh(|| resolver.is_available(BinaryRole::Server))
    }
}

impl SupervisorInner {
    async fn start_exclusive(
        self: &Arc<Self>,
        model_path: &Path,
        options: &ServerOptions,
    ) -> Result<u16, DomainError> {
        let mut running = self.lifecycle.lock().await;

        if let Some(server) = running.as_ref() {
            if self.state.load().is_ready()
                && server.info.model_path == model_path
                && server.options == *options
            {
                let port = server.info.port;
                debug!(port, "Server already running with requested model");
                return Ok(port);
            }
        }

        if let Some(server) = running.take() {
            info!(port = server.info.port, "Replacing running server");
            self.shutdown(server).await;
            self.clear();
        }

        self.state.store(ServerState::Starting);
        match self.launch(model_path, options).await {
            Ok(server) => {
                let port = server.info.port;
                *running = Some(server);
                Ok(port)
            }
            Err(e) => {
                error!(error = %e, model = ?model_path, "Failed to start inference server");
                self.clear();
                Err(e)
            }
        }
    }

    async fn launch(
        self: &Arc<Self>,
        model_path: &Path,
        options: &ServerOptions,
    ) -> Result<RunningServer, DomainError> {
        let binary = self.resolver.resolve(BinaryRole::Server)?;
        if !model_path.is_file() {
            let missing = model_path.display().to_string();
            return Err(DomainError::ModelNotFound(missing));
        }
        let port = self.allocate_port()?;

        let mut spec = LaunchSpec::new(binary)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("-m")
            .arg(model_path.display().to_string());
        if options.threads > 0 {
            spec = spec.arg("-t").arg(options.threads.to_string());
        }
        if let Some(language) = &options.language {
            spec = spec.arg("-l").arg(language.clone());
        }
        spec.path_prepend = converter_dir(&self.resolver);

        info!(port, model = ?model_path, threads = options.threads, "Starting inference server");
        self.events.emit(PipelineEvent::ServerStarting {
            port,
            model: model_path.display().to_string(),
        });

        let started = Instant::now();
        let mut process = self.launcher.launch(&spec).await?;
        if let Err(e) = self.wait_until_live(process.as_mut(), port).await {
            if let Err(kill_err) = process.kill().await {
                warn!(error = %kill_err, "Failed to kill server after failed start");
            }
            return Err(e);
        }

        let startup_ms = started.elapsed().as_millis() as u64;
        let info = ServerInfo {
            port,
            model_path: model_path.to_path_buf(),
        };
        *self.current.lock() = Some(info.clone());
        self.state.store(ServerState::Ready);
        let ready = PipelineEvent::ServerReady { port, startup_ms };
        self.events.emit(ready);
        info!(port, startup_ms, "Inference server ready");

        Ok(RunningServer {
            process,
            info,
            options: options.clone(),
            health_task: self.spawn_health_loop(port),
        })
    }

    async fn wait_until_live(
        &self,
        process: &mut dyn ManagedProcess,
        port: u16,
    ) -> Result<(), DomainError> {
        let deadline = Instant::now() + self.config.startup_timeout();
        loop {
            if let Some(exit) = process.try_exit()? {
                // Let the output readers drain.
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Err(DomainError::ProcessCrashed {
                    code: exit.code,
                    diagnostics: process.diagnostics(),
                });
            }
            if self.check.is_live(port).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let timeout_ms = self.config.startup_timeout_ms;
                warn!(port, timeout_ms, "Server start timed out");
                return Err(DomainError::ProcessStartTimeout {
                    secs: timeout_ms.div_ceil(1000),
                });
            }
            tokio::time::sleep(self.config.startup_poll_interval()).await;
        }
    }

    /// First loopback port in the configured range that can be bound.
    fn allocate_port(&self) -> Result<u16, DomainError> {
        let (start, end) = (self.config.port_range_start, self.config.port_range_end);
        (start..=end)
            .find(|port| TcpListener::bind(("127.0.0.1", *port)).is_ok())
            .ok_or_else(|| DomainError::Io(format!("No free port in range {}-{}", start, end)))
    }

    fn spawn_health_loop(self: &Arc<Self>, port: u16) -> JoinHandle<()> {
        let weak: Weak<SupervisorInner> = Arc::downgrade(self);
        let interval = self.config.health_interval();
        let threshold = self.config.health_failure_threshold.max(1);

        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                tokio::time::sleep(interval).await;
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };

                if inner.check.is_live(port).await {
                    if inner.recover() {
                        info!(port, "Inference server recovered");
                    }
                    failures = 0;
                    continue;
                }

                failures += 1;
                warn!(port, failures, "Inference server health check failed");
                if failures >= threshold && inner.degrade() {
                    error!(port, failures, "Inference server degraded");
                    inner.events.emit(PipelineEvent::ServerDegraded {
                        port,
                        consecutive_failures: failures,
                    });
                }
            }
        })
    }

    fn degrade(&self) -> bool {
        let state = &self.state;
        state.compare_exchange(ServerState::Ready, ServerState::Degraded)
    }

    fn recover(&self) -> bool {
        let state = &self.state;
        state.compare_exchange(ServerState::Degraded, ServerState::Ready)
    }

    /// Terminate, wait out the grace period, then force-kill.
    async fn shutdown(&self, server: RunningServer) {
        let RunningServer {
            mut process,
            info,
            health_task,
            ..
        } = server;
        health_task.abort();

        info!(port = info.port, pid = ?process.pid(), "Stopping inference server");
        if let Err(e) = process.terminate().await {
            warn!(error = %e, "Failed to signal inference server");
        }

        let grace = self.config.stop_grace();
        let graceful = match tokio::time::timeout(grace, process.wait()).await {
            Ok(Ok(exit)) => {
                debug!(code = ?exit.code, "Inference server exited");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed waiting for inference server");
                false
            }
            Err(_) => {
                let grace_ms = self.config.stop_grace_ms;
                warn!(grace_ms, "Inference server ignored termination, killing");
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "Failed to kill inference server");
                }
                false
            }
        };

        self.events.emit(PipelineEvent::ServerStopped { graceful });
    }

    fn clear(&self) {
        *self.current.lock() = None;
        self.state.store(ServerState::Stopped);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ports::ExitInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Observable state of a fake child.
    #[derive(Default)]
    pub(crate) struct FakeChild {
        exit: Mutex<Option<ExitInfo>>,
        ignore_terminate: bool,
        pub terminated: AtomicBool,
        pub killed: AtomicBool,
    }

    struct FakeProcess(Arc<FakeChild>);

    #[async_trait]
    impl ManagedProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        fn try_exit(&mut self) -> Result<Option<ExitInfo>, DomainError> {
            Ok(*self.0.exit.lock())
        }

        async fn terminate(&mut self) -> Result<(), DomainError> {
            self.0.terminated.store(true, Ordering::SeqCst);
            if !self.0.ignore_terminate {
                *self.0.exit.lock() = Some(ExitInfo { code: None });
            }
            Ok(())
        }

        async fn kill(&mut self) -> Result<(), DomainError> {
            self.0.killed.store(true, Ordering::SeqCst);
            *self.0.exit.lock() = Some(ExitInfo { code: None });
            Ok(())
        }

        async fn wait(&mut self) -> Result<ExitInfo, DomainError> {
            loop {
                let exit = *self.0.exit.lock();
                if let Some(exit) = exit {
                    return Ok(exit);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        fn diagnostics(&self) -> String {
            "error: failed to load model".to_string()
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeLauncher {
        pub spawns: AtomicUsize,
        pub children: Mutex<Vec<Arc<FakeChild>>>,
        pub specs: Mutex<Vec<LaunchSpec>>,
        crash_code: Option<i32>,
        ignore_terminate: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, DomainError> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            self.specs.lock().push(spec.clone());
            tokio::time::sleep(self.delay).await;
            let exit = self.crash_code.map(|code| ExitInfo { code: Some(code) });
            let child = Arc::new(FakeChild {
                exit: Mutex::new(exit),
                ignore_terminate: self.ignore_terminate,
                ..Default::default()
            });
            self.children.lock().push(child.clone());
            Ok(Box::new(FakeProcess(child)))
        }
    }

    pub(crate) struct FakeCheck {
        pub live: AtomicBool,
    }

    impl FakeCheck {
        pub fn new(live: bool) -> Arc<Self> {
            Arc::new(Self {
                live: AtomicBool::new(live),
            })
        }
    }

    #[async_trait]
    impl HealthCheck for FakeCheck {
        async fn is_live(&self, _port: u16) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn write_executable(path: &Path, script: &str) {
        std::fs::write(path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::Permissions::from_mode(0o755);
            std::fs::set_permissions(path, mode).unwrap();
        }
    }

    /// Temp dir holding an executable server binary and a model file.
    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub model: PathBuf,
        pub binary: PathBuf,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let binary = dir.path().join("whisper-server");
            write_executable(&binary, "#!/bin/sh\nexec sleep 30\n");
            let model = dir.path().join("ggml-base.bin");
            std::fs::write(&model, vec![0u8; 2 * 1024 * 1024]).unwrap();
            Self { dir, model, binary }
        }

        /// Another model file next to the default one.
        pub fn model_named(&self, name: &str) -> PathBuf {
            let model = self.dir.path().join(name);
            std::fs::write(&model, vec![0u8; 2 * 1024 * 1024]).unwrap();
            model
        }

        pub fn resolver(&self) -> Arc<BinaryResolver> {
            let missing_converter = self.dir.path().join("no-ffmpeg");
            Arc::new(
                BinaryResolver::new(None)
                    .with_override(BinaryRole::Server, self.binary.clone())
                    .with_override(BinaryRole::Converter, missing_converter)
                    .with_search_path("")
                    .without_well_known_dirs(),
            )
        }
    }

    pub(crate) fn fast_config() -> ServerConfig {
        ServerConfig {
            startup_timeout_ms: 2_000,
            startup_poll_ms: 10,
            health_interval_ms: 20,
            health_failure_threshold: 3,
            stop_grace_ms: 200,
            ..Default::default()
        }
    }

    fn supervisor_with(
        fixture: &Fixture,
        launcher: Arc<FakeLauncher>,
        check: Arc<FakeCheck>,
        config: ServerConfig,
    ) -> ServerSupervisor {
        let events = EventBus::default();
        ServerSupervisor::new(launcher, check, fixture.resolver(), config, events)
    }

    fn supervisor(
        fixture: &Fixture,
        launcher: Arc<FakeLauncher>,
        check: Arc<FakeCheck>,
    ) -> ServerSupervisor {
        supervisor_with(fixture, launcher, check, fast_config())
    }

    fn spawns(launcher: &FakeLauncher) -> usize {
        launcher.spawns.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_start_reaches_ready() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));
        let mut events = sup.inner.events.subscribe();
        let options = ServerOptions::default();

        let port = sup.start(&fixture.model, &options).await.unwrap();
        assert_eq!(sup.ready_port(), Some(port));

        let status = sup.status();
        assert!(status.available);
        assert!(status.running);
        assert_eq!(status.state, ServerState::Ready);
        assert_eq!(status.port, Some(port));
        assert_eq!(status.model_name.as_deref(), Some("ggml-base.bin"));

        let specs = launcher.specs.lock().clone();
        let port_arg = port.to_string();
        assert_eq!(specs[0].flag_value("--host"), Some("127.0.0.1"));
        assert_eq!(specs[0].flag_value("--port"), Some(port_arg.as_str()));
        assert_eq!(specs[0].flag_value("-t"), None);
        assert_eq!(specs[0].path_prepend, None);

        match events.try_recv().unwrap() {
            PipelineEvent::ServerStarting { port: p, model } => {
                assert_eq!(p, port);
                assert!(model.ends_with("ggml-base.bin"));
            }
            other => panic!("expected ServerStarting, got {:?}", other),
        }
        match events.try_recv().unwrap() {
            PipelineEvent::ServerReady { port: p, .. } => assert_eq!(p, port),
            other => panic!("expected ServerReady, got {:?}", other),
        }

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_converter_dir_prepended_to_server_path() {
        let fixture = Fixture::new();
        let tools = fixture.dir.path().join("tools");
        std::fs::create_dir(&tools).unwrap();
        let converter = tools.join("ffmpeg");
        write_executable(&converter, "#!/bin/sh\nexit 0\n");
        let resolver = Arc::new(
            BinaryResolver::new(None)
                .with_override(BinaryRole::Server, fixture.binary.clone())
                .with_override(BinaryRole::Converter, converter)
                .with_search_path("")
                .without_well_known_dirs(),
        );
        let launcher = Arc::new(FakeLauncher::default());
        let sup = ServerSupervisor::new(
            launcher.clone(),
            FakeCheck::new(true),
            resolver,
            fast_config(),
            EventBus::default(),
        );

        let options = ServerOptions::default();
        sup.start(&fixture.model, &options).await.unwrap();

        let specs = launcher.specs.lock().clone();
        assert_eq!(specs[0].path_prepend, Some(tools));

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_starts_spawn_once() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));
        let options = ServerOptions::default();

        let (a, b, c) = tokio::join!(
            sup.start(&fixture.model, &options),
            sup.start(&fixture.model, &options),
            sup.start(&fixture.model, &options),
        );
        let port = a.unwrap();
        assert_eq!(b.unwrap(), port);
        assert_eq!(c.unwrap(), port);
        assert_eq!(spawns(&launcher), 1);

        // Already ready with the same model: no new spawn.
        assert_eq!(sup.start(&fixture.model, &options).await.unwrap(), port);
        assert_eq!(spawns(&launcher), 1);

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_start_of_other_model_replaces_pending() {
        let fixture = Fixture::new();
        let small = fixture.model_named("ggml-small.bin");
        let launcher = Arc::new(FakeLauncher {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));
        let options = ServerOptions::default();

        let (base_start, small_start) = tokio::join!(
            sup.start(&fixture.model, &options),
            sup.start(&small, &options),
        );
        assert!(base_start.is_ok());
        let port = small_start.unwrap();

        assert_eq!(spawns(&launcher), 2);
        assert_eq!(sup.current_model(), Some(small.clone()));
        assert_eq!(sup.ready_port(), Some(port));
        assert!(launcher.children.lock()[0].terminated.load(Ordering::SeqCst));

        let specs = launcher.specs.lock().clone();
        let small_arg = small.display().to_string();
        assert_eq!(specs[1].flag_value("-m"), Some(small_arg.as_str()));

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_changed_options_restart_server() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));

        let defaults = ServerOptions::default();
        sup.start(&fixture.model, &defaults).await.unwrap();
        let options = ServerOptions {
            threads: 4,
            language: Some("de".to_string()),
        };
        sup.start(&fixture.model, &options).await.unwrap();

        assert_eq!(spawns(&launcher), 2);
        assert!(launcher.children.lock()[0].terminated.load(Ordering::SeqCst));
        let specs = launcher.specs.lock().clone();
        assert_eq!(specs[1].flag_value("-t"), Some("4"));
        assert_eq!(specs[1].flag_value("-l"), Some("de"));

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_missing_model_fails_before_spawn() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));

        let missing = fixture.dir.path().join("missing.bin");
        let options = ServerOptions::default();
        let err = sup.start(&missing, &options).await.unwrap_err();
        assert!(matches!(err, DomainError::ModelNotFound(_)));
        assert_eq!(spawns(&launcher), 0);
        assert_eq!(sup.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let fixture = Fixture::new();
        let resolver = Arc::new(
            BinaryResolver::new(None)
                .with_search_path("")
                .without_well_known_dirs(),
        );
        let sup = ServerSupervisor::new(
            Arc::new(FakeLauncher::default()),
            FakeCheck::new(true),
            resolver,
            fast_config(),
            EventBus::default(),
        );

        let options = ServerOptions::default();
        let err = sup.start(&fixture.model, &options).await.unwrap_err();
        assert!(matches!(err, DomainError::BinaryNotFound { .. }));
        assert!(!sup.status().available);
    }

    #[tokio::test]
    async fn test_early_exit_is_crash_with_diagnostics() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher {
            crash_code: Some(1),
            ..Default::default()
        });
        let sup = supervisor(&fixture, launcher, FakeCheck::new(false));

        match sup.start(&fixture.model, &ServerOptions::default()).await {
            Err(DomainError::ProcessCrashed { code, diagnostics }) => {
                assert_eq!(code, Some(1));
                assert!(diagnostics.contains("failed to load model"));
            }
            other => panic!("expected ProcessCrashed, got {:?}", other),
        }
        assert_eq!(sup.state(), ServerState::Stopped);
        assert_eq!(sup.status().port, None);
    }

    #[tokio::test]
    async fn test_startup_timeout_kills_process() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let config = ServerConfig {
            startup_timeout_ms: 150,
            ..fast_config()
        };
        let sup = supervisor_with(&fixture, launcher.clone(), FakeCheck::new(false), config);

        let options = ServerOptions::default();
        let err = sup.start(&fixture.model, &options).await.unwrap_err();
        assert!(matches!(err, DomainError::ProcessStartTimeout { secs: 1 }));
        assert!(launcher.children.lock()[0].killed.load(Ordering::SeqCst));
        assert_eq!(sup.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_health_checks_degrade_then_recover() {
        let fixture = Fixture::new();
        let check = FakeCheck::new(true);
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(&fixture, launcher, check.clone());
        let mut events = sup.inner.events.subscribe();

        let options = ServerOptions::default();
        let port = sup.start(&fixture.model, &options).await.unwrap();
        check.live.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(sup.state(), ServerState::Degraded);
        assert_eq!(sup.ready_port(), None);
        assert!(sup.status().running);
        assert_eq!(sup.status().port, Some(port));

        let mut degraded = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::ServerDegraded {
                consecutive_failures,
                ..
            } = event
            {
                assert_eq!(consecutive_failures, 3);
                degraded = true;
            }
        }
        assert!(degraded);

        check.live.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sup.ready_port(), Some(port));

        sup.stop().await;
    }

    #[tokio::test]
    async fn test_stop_graceful_clears_state() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));
        let mut events = sup.inner.events.subscribe();

        let options = ServerOptions::default();
        sup.start(&fixture.model, &options).await.unwrap();
        sup.stop().await;

        let child = launcher.children.lock()[0].clone();
        assert!(child.terminated.load(Ordering::SeqCst));
        assert!(!child.killed.load(Ordering::SeqCst));

        let status = sup.status();
        assert_eq!(status.state, ServerState::Stopped);
        assert!(!status.running);
        assert_eq!(status.port, None);
        assert_eq!(status.model_path, None);

        let mut stopped = None;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::ServerStopped { graceful } = event {
                stopped = Some(graceful);
            }
        }
        assert_eq!(stopped, Some(true));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher {
            ignore_terminate: true,
            ..Default::default()
        });
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));

        let options = ServerOptions::default();
        sup.start(&fixture.model, &options).await.unwrap();
        let started = Instant::now();
        sup.stop().await;

        assert!(started.elapsed() >= Duration::from_millis(200));
        let child = launcher.children.lock()[0].clone();
        assert!(child.terminated.load(Ordering::SeqCst));
        assert!(child.killed.load(Ordering::SeqCst));
        assert_eq!(sup.status().port, None);
        assert_eq!(sup.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_waits_for_inflight_start() {
        let fixture = Fixture::new();
        let launcher = Arc::new(FakeLauncher {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let sup = supervisor(&fixture, launcher.clone(), FakeCheck::new(true));

        let starter = sup.clone();
        let model = fixture.model.clone();
        let start = tokio::spawn(async move {
            let options = ServerOptions::default();
            starter.start(&model, &options).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sup.stop().await;

        assert!(start.await.unwrap().is_ok());
        assert_eq!(sup.state(), ServerState::Stopped);
        assert!(launcher.children.lock()[0].terminated.load(Ordering::SeqCst));
    }

    #[test]
    fn test_allocate_port_skips_bound_ports() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let fixture = Fixture::new();
        let config = ServerConfig {
            port_range_start: port,
            port_range_end: port,
            ..fast_config()
        };
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor_with(&fixture, launcher, FakeCheck::new(true), config);
        assert!(matches!(sup.inner.allocate_port(), Err(DomainError::Io(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_terminates_on_stop() {
        use crate::adapters::process_launcher::TokioProcessLauncher;

        let fixture = Fixture::new();
        let sup = ServerSupervisor::new(
            Arc::new(TokioProcessLauncher::new()),
            FakeCheck::new(true),
            fixture.resolver(),
            fast_config(),
            EventBus::default(),
        );
        let mut events = sup.inner.events.subscribe();

        let options = ServerOptions::default();
        sup.start(&fixture.model, &options).await.unwrap();
        assert!(sup.ready_port().is_some());
        sup.stop().await;

        let mut graceful = None;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::ServerStopped { graceful: g } = event {
                graceful = Some(g);
            }
        }
        assert_eq!(graceful, Some(true));
        assert_eq!(sup.state(), ServerState::Stopped);
    }
}
