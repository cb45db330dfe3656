use serde::Serialize;
use tokio::sync::broadcast;

use super::audio::AudioContainer;
use super::transcription::Backend;

/// Progress notifications emitted by long-running pipeline operations.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    ServerStarting { port: u16, model: String },
    ServerReady { port: u16, startup_ms: u64 },
    ServerDegraded {
        port: u16,
        consecutive_failures: u32,
    },
    ServerStopped { graceful: bool },
    ConversionStarted {
        container: AudioContainer,
        bytes: usize,
    },
    ConversionFinished {
        converted: bool,
        duration_ms: u64,
        success: bool,
    },
    TranscriptionStarted { backend: Backend },
    TranscriptionFinished {
        backend: Backend,
        success: bool,
        duration_ms: u64,
    },
    FallbackAttempted {
        from: Backend,
        to: Backend,
        reason: String,
    },
}

/// Broadcast channel for pipeline events.
///
/// Emitting never blocks and never fails; without subscribers events are
/// dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: PipelineEvent) {
        // Err only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
