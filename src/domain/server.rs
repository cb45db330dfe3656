use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Inference server lifecycle.
///
/// State transitions:
/// - Stopped -> Starting (start)
/// - Starting -> Ready (liveness check succeeded)
/// - Starting -> Stopped (crash, timeout, spawn failure)
/// - Ready -> Degraded (consecutive health check failures)
/// - Degraded -> Ready (health check succeeded again)
/// - any -> Stopped (stop)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Ready = 2,
    Degraded = 3,
}

impl ServerState {
    /// Requests may only be served in this state.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, ServerState::Ready)
    }

    /// A process exists (possibly unhealthy).
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, ServerState::Ready | ServerState::Degraded)
    }
}

impl From<u8> for ServerState {
    fn from(value: u8) -> Self {
        match value {
            1 => ServerState::Starting,
            2 => ServerState::Ready,
            3 => ServerState::Degraded,
            _ => ServerState::Stopped,
        }
    }
}

impl From<ServerState> for u8 {
    fn from(state: ServerState) -> Self {
        state as u8
    }
}

/// Atomic wrapper for ServerState for lock-free reads.
#[derive(Debug)]
pub struct AtomicServerState(AtomicU8);

impl AtomicServerState {
    pub fn new(state: ServerState) -> Self {
        Self(AtomicU8::new(state.into()))
    }

    pub fn load(&self) -> ServerState {
        self.0.load(Ordering::Acquire).into()
    }

    pub fn store(&self, state: ServerState) {
        self.0.store(state.into(), Ordering::Release);
    }

    /// Compare and swap, returns true if successful.
    pub fn compare_exchange(&self, current: ServerState, new: ServerState) -> bool {
        self.0
            .compare_exchange(
                current.into(),
                new.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for AtomicServerState {
    fn default() -> Self {
        Self::new(ServerState::Stopped)
    }
}

/// Per-start options for the inference server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Inference threads (0 = let the server decide).
    pub threads: u32,
    /// Language code passed at startup, None for auto-detection.
    pub language: Option<String>,
}

/// Public view of the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// The server binary can be found on this system.
    pub available: bool,
    /// A server process exists (ready or degraded).
    pub running: bool,
    pub state: ServerState,
    pub port: Option<u16>,
    pub model_path: Option<PathBuf>,
    /// File name of the loaded model.
    pub model_name: Option<String>,
}
