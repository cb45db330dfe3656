use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::adapters::binary_resolver::{BinaryResolver, BinaryRole};
use crate::domain::config::DaemonConfig;
use crate::domain::{classify_transcript, DomainError, NormalizedAudio, Transcript};
use crate::ports::{
    LaunchSpec, ManagedProcess, ProcessIo, ProcessLauncher, TranscribeConfig, Transcriber,
};

type Lines = mpsc::UnboundedReceiver<String>;

/// One JSON line written by the daemon.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DaemonMessage {
    Status {
        status: String,
        device: Option<String>,
    },
    Result { text: String, id: Option<u64> },
    Error { message: String, id: Option<u64> },
    Fatal { message: String },
    Pong,
}

/// One JSON line sent to the daemon.
#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum DaemonCommand {
    Transcribe { id: u64, file_path: String },
    Ping,
    Exit,
}

/// Outcome of the `check-gpu` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub available: bool,
    pub device: Option<String>,
    pub error: Option<String>,
}

/// How a transcription request ended.
enum Reply {
    Text(String),
    Failed(String),
    Fatal(String),
    Closed,
    TimedOut,
}

struct DaemonSession {
    process: Box<dyn ManagedProcess>,
    io: ProcessIo,
    device: Option<String>,
}

/// Transcribes through a long-running daemon speaking JSON lines over stdio.
///
/// The daemon is started on first use and kept for later requests. A session
/// is reused only while it answers `ping`; otherwise it is killed and a new
/// one started. Requests are serialized.
pub struct DaemonTranscriber {
    launcher: Arc<dyn ProcessLauncher>,
    resolver: Arc<BinaryResolver>,
    config: DaemonConfig,
    session: Mutex<Option<DaemonSession>>,
    next_id: AtomicU64,
}

impl DaemonTranscriber {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        resolver: Arc<BinaryResolver>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            launcher,
            resolver,
            config,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Ask the daemon script which device it would run on.
    pub async fn check_device(&self) -> Result<DeviceReport, DomainError> {
        let (mut process, mut io) = self.launch("check-gpu").await?;
        let timeout = self.config.startup_timeout();
        let report = tokio::time::timeout(timeout, read_report(&mut io.stdout)).await;
        drop(io);

        match report {
            Ok(Some(report)) => {
                self.reap(process).await;
                debug!(available = report.available, "Device check finished");
                Ok(report)
            }
            Ok(None) => Err(self.crash(process, "device check printed no report").await),
            Err(_) => {
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "Failed to kill device check");
                }
                Err(DomainError::ProcessStartTimeout {
                    secs: self.config.startup_timeout_ms.div_ceil(1000),
                })
            }
        }
    }

    /// Send `exit`, wait out the grace period, then force-kill.
    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            self.shutdown(session).await;
        }
    }

    fn spec(&self, mode: &str) -> Result<LaunchSpec, DomainError> {
        let script = match &self.config.script {
            Some(script) => script,
            None => {
                let message = "No daemon script configured".to_string();
                return Err(DomainError::Config(message));
            }
        };
        if !script.is_file() {
            let message = format!("Daemon script not found: {}", script.display());
            return Err(DomainError::Config(message));
        }
        let interpreter = self.resolver.resolve(BinaryRole::Daemon)?;

        Ok(LaunchSpec::new(interpreter)
            .arg(script.display().to_string())
            .arg(mode)
            .arg("--model")
            .arg(self.config.model.clone())
            .interactive())
    }

    async fn launch(
        &self,
        mode: &str,
    ) -> Result<(Box<dyn ManagedProcess>, ProcessIo), DomainError> {
        let spec = self.spec(mode)?;
        let mut process = self.launcher.launch(&spec).await?;
        match process.take_io() {
            Some(io) => Ok((process, io)),
            None => {
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "Failed to kill daemon without stdio");
                }
                Err(DomainError::Io("Daemon started without stdio".to_string()))
            }
        }
    }

    async fn spawn(&self) -> Result<DaemonSession, DomainError> {
        info!(model = %self.config.model, "Starting inference daemon");
        let started = Instant::now();
        let (mut process, mut io) = self.launch("server").await?;

        let timeout = self.config.startup_timeout();
        match tokio::time::timeout(timeout, wait_ready(&mut io.stdout)).await {
            Ok(Ok(device)) => {
                let startup_ms = started.elapsed().as_millis() as u64;
                info!(device = ?device, startup_ms, "Inference daemon ready");
                Ok(DaemonSession {
                    process,
                    io,
                    device,
                })
            }
            Ok(Err(message)) => {
                error!(message = %message, "Inference daemon failed to start");
                drop(io);
                Err(self.crash(process, &message).await)
            }
            Err(_) => {
                let timeout_ms = self.config.startup_timeout_ms;
                warn!(timeout_ms, "Inference daemon start timed out");
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "Failed to kill inference daemon");
                }
                Err(DomainError::ProcessStartTimeout {
                    secs: timeout_ms.div_ceil(1000),
                })
            }
        }
    }

    /// Reuse the session when it still answers, otherwise start a new one.
    async fn ensure_session<'a>(
        &self,
        slot: &'a mut Option<DaemonSession>,
    ) -> Result<&'a mut DaemonSession, DomainError> {
        let alive = match slot.as_mut() {
            Some(session) => self.is_alive(session).await,
            None => false,
        };
        if !alive {
            if let Some(stale) = slot.take() {
                warn!("Inference daemon stopped answering, restarting");
                self.abandon(stale).await;
            }
            *slot = Some(self.spawn().await?);
        }
        slot.as_mut().ok_or(DomainError::NotReady)
    }

    async fn is_alive(&self, session: &mut DaemonSession) -> bool {
        match session.process.try_exit() {
            Ok(None) => {}
            Ok(Some(exit)) => {
                warn!(code = ?exit.code, "Inference daemon exited");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to check inference daemon");
                return false;
            }
        }
        if send(&session.io, &DaemonCommand::Ping).is_err() {
            return false;
        }
        let timeout = self.config.ping_timeout();
        let pong = tokio::time::timeout(timeout, wait_pong(&mut session.io.stdout)).await;
        matches!(pong, Ok(true))
    }

    async fn request(&self, session: &mut DaemonSession, file_path: String) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, file = %file_path, device = ?session.device, "Daemon transcription");
        if send(&session.io, &DaemonCommand::Transcribe { id, file_path }).is_err() {
            return Reply::Closed;
        }
        let timeout = self.config.request_timeout();
        let stdout = &mut session.io.stdout;
        match tokio::time::timeout(timeout, wait_reply(stdout, id)).await {
            Ok(reply) => reply,
            Err(_) => Reply::TimedOut,
        }
    }

    async fn shutdown(&self, session: DaemonSession) {
        let DaemonSession {
            mut process, io, ..
        } = session;
        if let Err(e) = send(&io, &DaemonCommand::Exit) {
            debug!(error = %e, "Could not send exit command");
        }
        drop(io);

        let grace = self.config.stop_grace();
        let graceful = match tokio::time::timeout(grace, process.wait()).await {
            Ok(Ok(exit)) => {
                debug!(code = ?exit.code, "Inference daemon exited");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed waiting for inference daemon");
                false
            }
            Err(_) => {
                warn!("Inference daemon ignored exit command, killing");
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "Failed to kill inference daemon");
                }
                false
            }
        };
        info!(graceful, "Inference daemon stopped");
    }

    async fn abandon(&self, session: DaemonSession) {
        let mut process = session.process;
        if let Err(e) = process.kill().await {
            warn!(error = %e, "Failed to kill inference daemon");
        }
    }

    /// Wait for the exit code, killing the process after the grace period.
    async fn reap(&self, mut process: Box<dyn ManagedProcess>) -> (Option<i32>, String) {
        let grace = self.config.stop_grace();
        let code = match tokio::time::timeout(grace, process.wait()).await {
            Ok(Ok(exit)) => exit.code,
            Ok(Err(_)) | Err(_) => {
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "Failed to kill inference daemon");
                }
                None
            }
        };
        (code, process.diagnostics())
    }

    async fn crash(&self, process: Box<dyn ManagedProcess>, message: &str) -> DomainError {
        let (code, tail) = self.reap(process).await;
        let diagnostics = if tail.is_empty() {
            message.to_string()
        } else {
            format!("{}\n{}", message, tail)
        };
        DomainError::ProcessCrashed { code, diagnostics }
    }
}

#[async_trait]
impl Transcriber for DaemonTranscriber {
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        config: &TranscribeConfig,
    ) -> Result<Transcript, DomainError> {
        if config.language.is_some() {
            debug!("Inference daemon ignores the language setting");
        }

        let mut slot = self.session.lock().await;
        let session = self.ensure_session(&mut slot).await?;
        let start = Instant::now();
        let file_path = audio.path().display().to_string();

        match self.request(session, file_path).await {
            Reply::Text(text) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    duration_ms,
                    chars = text.len(),
                    "Daemon transcription completed"
                );
                classify_transcript(Transcript {
                    text,
                    detected_language: None,
                    duration_ms,
                })
            }
            Reply::Failed(message) => {
                warn!(message = %message, "Inference daemon rejected request");
                let message = format!("Daemon transcription failed: {}", message);
                Err(DomainError::Io(message))
            }
            Reply::Fatal(message) => Err(self.drop_session(&mut slot, &message).await),
            Reply::Closed => {
                let message = "inference daemon closed its output";
                Err(self.drop_session(&mut slot, message).await)
            }
            Reply::TimedOut => {
                let secs = self.config.request_timeout_secs;
                warn!(secs, "Daemon transcription timed out");
                if let Some(session) = slot.take() {
                    self.abandon(session).await;
                }
                Err(DomainError::ProcessCrashed {
                    code: None,
                    diagnostics: format!("timed out after {}s", secs),
                })
            }
        }
    }
}

impl DaemonTranscriber {
    async fn drop_session(&self, slot: &mut Option<DaemonSession>, message: &str) -> DomainError {
        error!(message = %message, "Inference daemon failed");
        match slot.take() {
            Some(session) => {
                drop(session.io);
                self.crash(session.process, message).await
            }
            None => DomainError::NotReady,
        }
    }
}

fn send(io: &ProcessIo, command: &DaemonCommand) -> Result<(), DomainError> {
    let line = serde_json::to_string(command)?;
    io.stdin
        .send(line)
        .map_err(|_| DomainError::Io("Daemon stdin is closed".to_string()))
}

/// Next protocol message, skipping any other output.
async fn next_message(stdout: &mut Lines) -> Option<DaemonMessage> {
    while let Some(line) = stdout.recv().await {
        match serde_json::from_str::<DaemonMessage>(&line) {
            Ok(message) => return Some(message),
            Err(_) => trace!(line = %line, "Ignoring daemon output"),
        }
    }
    None
}

/// Device from the ready line, or the reason the daemon never got there.
async fn wait_ready(stdout: &mut Lines) -> Result<Option<String>, String> {
    loop {
        match next_message(stdout).await {
            Some(DaemonMessage::Status { status, device }) if status == "ready" => {
                return Ok(device);
            }
            Some(DaemonMessage::Error { message, .. }) | Some(DaemonMessage::Fatal { message }) => {
                return Err(message);
            }
            Some(other) => debug!(message = ?other, "Ignoring daemon message before ready"),
            None => return Err("inference daemon exited before it was ready".to_string()),
        }
    }
}

async fn wait_pong(stdout: &mut Lines) -> bool {
    loop {
        match next_message(stdout).await {
            Some(DaemonMessage::Pong) => return true,
            Some(DaemonMessage::Fatal { .. }) | None => return false,
            Some(other) => debug!(message = ?other, "Skipping stale daemon message"),
        }
    }
}

/// Replies without an id belong to the request in flight.
fn answers(reply_id: Option<u64>, id: u64) -> bool {
    reply_id.is_none() || reply_id == Some(id)
}

async fn wait_reply(stdout: &mut Lines, id: u64) -> Reply {
    loop {
        let message = match next_message(stdout).await {
            Some(message) => message,
            None => return Reply::Closed,
        };
        match message {
            DaemonMessage::Result { text, id: reply } if answers(reply, id) => {
                return Reply::Text(text);
            }
            DaemonMessage::Error { message, id: reply } if answers(reply, id) => {
                return Reply::Failed(message);
            }
            DaemonMessage::Fatal { message } => return Reply::Fatal(message),
            other => debug!(message = ?other, "Skipping unrelated daemon message"),
        }
    }
}

async fn read_report(stdout: &mut Lines) -> Option<DeviceReport> {
    while let Some(line) = stdout.recv().await {
        match serde_json::from_str::<DeviceReport>(&line) {
            Ok(report) => return Some(report),
            Err(_) => trace!(line = %line, "Ignoring device check output"),
        }
    }
    None
}
