use std::collections::VecDeque;
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::domain::DomainError;
use crate::ports::{ExitInfo, LaunchSpec, ManagedProcess, ProcessIo, ProcessLauncher};

/// Lines of child output kept for crash diagnostics.
const DIAGNOSTIC_LINES: usize = 40;

type OutputTail = Arc<Mutex<VecDeque<String>>>;

/// Spawns real OS processes through tokio.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, DomainError> {
        let stdin = if spec.interactive {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.path_prepend {
            let path = prepend_path(dir.as_os_str(), std::env::var_os("PATH"));
            command.env("PATH", path);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let program = spec.program.display();
                return Err(DomainError::Io(format!("Failed to start {}: {}", program, e)));
            }
        };

        let tail: OutputTail = Arc::new(Mutex::new(VecDeque::with_capacity(DIAGNOSTIC_LINES)));
        let io = if spec.interactive {
            attach_io(&mut child)
        } else {
            None
        };
        if let Some(stdout) = child.stdout.take() {
            spawn_tail_reader(stdout, tail.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_tail_reader(stderr, tail.clone());
        }

        info!(program = ?spec.program, pid = ?child.id(), "Process started");
        Ok(Box::new(TokioProcess { child, tail, io }))
    }
}

fn prepend_path(dir: &std::ffi::OsStr, current: Option<OsString>) -> OsString {
    let mut paths = vec![std::path::PathBuf::from(dir)];
    if let Some(current) = current {
        paths.extend(std::env::split_paths(&current));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.to_os_string())
}

fn spawn_tail_reader<R>(reader: R, tail: OutputTail)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            trace!(line = %line, "child output");
            let mut tail = tail.lock();
            if tail.len() == DIAGNOSTIC_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    });
}

/// Wire stdin and stdout of `child` to line channels.
fn attach_io(child: &mut Child) -> Option<ProcessIo> {
    let stdin = child.stdin.take()?;
    let stdout = child.stdout.take()?;
    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();

    tokio::spawn(write_lines(stdin, stdin_rx));
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            trace!(line = %line, "child stdout");
            if stdout_tx.send(line).is_err() {
                break;
            }
        }
    });

    Some(ProcessIo {
        stdin: stdin_tx,
        stdout: stdout_rx,
    })
}

/// Forward queued lines to the child until the sender side is dropped.
async fn write_lines(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = write_line(&mut stdin, &line).await {
            debug!(error = %e, "Child stdin closed");
            break;
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// A child process with captured output.
struct TokioProcess {
    child: Child,
    tail: OutputTail,
    io: Option<ProcessIo>,
}

fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code(),
    }
}

#[async_trait]
impl ManagedProcess for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> Result<Option<ExitInfo>, DomainError> {
        Ok(self.child.try_wait()?.map(exit_info))
    }

    #[cfg(unix)]
    async fn terminate(&mut self) -> Result<(), DomainError> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        debug!(pid, "Sending SIGTERM");
        // SAFETY: pid belongs to a child we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err.into());
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn terminate(&mut self) -> Result<(), DomainError> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn kill(&mut self) -> Result<(), DomainError> {
        debug!(pid = ?self.child.id(), "Killing process");
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait(&mut self) -> Result<ExitInfo, DomainError> {
        Ok(exit_info(self.child.wait().await?))
    }

    fn diagnostics(&self) -> String {
        let tail = self.tail.lock();
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn take_io(&mut self) -> Option<ProcessIo> {
        self.io.take()
    }
}
