use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::DomainError;

/// What to run for a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Directory prepended to the child's `PATH`.
    pub path_prepend: Option<PathBuf>,
    /// Pipe stdin and hand stdout lines to the caller instead of the
    /// diagnostics tail.
    pub interactive: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            path_prepend: None,
            interactive: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Value following `flag` in the argument list.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// None when terminated by a signal.
    pub code: Option<i32>,
}

/// Line-oriented stdio of an interactive process.
///
/// Dropping `stdin` closes the child's standard input. `stdout` ends when the
/// child closes its output.
pub struct ProcessIo {
    pub stdin: mpsc::UnboundedSender<String>,
    pub stdout: mpsc::UnboundedReceiver<String>,
}

/// A spawned child process.
#[async_trait]
pub trait ManagedProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> Result<Option<ExitInfo>, DomainError>;

    /// Ask the process to shut down (SIGTERM on unix).
    async fn terminate(&mut self) -> Result<(), DomainError>;

    /// Force the process down.
    async fn kill(&mut self) -> Result<(), DomainError>;

    async fn wait(&mut self) -> Result<ExitInfo, DomainError>;

    /// Recently captured diagnostic output (stderr tail).
    fn diagnostics(&self) -> String;

    /// Stdio channels of an interactive process. Yields them once.
    fn take_io(&mut self) -> Option<ProcessIo> {
        None
    }
}

/// Port for spawning supervised processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, DomainError>;
}

/// Port for liveness checks against a local server.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_live(&self, port: u16) -> bool;
}
