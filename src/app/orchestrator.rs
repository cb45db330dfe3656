use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::adapters::AudioNormalizer;
use crate::domain::{
    AudioBuffer, Backend, DomainError, EventBus, NormalizedAudio, PipelineEvent,
    TranscriptionOptions, TranscriptionResult, TranscriptionSource,
};
use crate::ports::{ReasoningService, TranscribeConfig, Transcriber};

/// Entry point for a transcription request.
///
/// Normalizes the recording once, runs the primary backend and, when the
/// options allow it, exactly one attempt on the opposite backend.
pub struct FallbackOrchestrator {
    normalizer: AudioNormalizer,
    local: Arc<dyn Transcriber>,
    cloud: Arc<dyn Transcriber>,
    reasoning: Option<Arc<dyn ReasoningService>>,
    events: EventBus,
}

impl FallbackOrchestrator {
    pub fn new(
        normalizer: AudioNormalizer,
        local: Arc<dyn Transcriber>,
        cloud: Arc<dyn Transcriber>,
        events: EventBus,
    ) -> Self {
        Self {
            normalizer,
            local,
            cloud,
            reasoning: None,
            events,
        }
    }

    pub fn with_reasoning(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.reasoning = Some(service);
        self
    }

    /// Normalize `buffer` and transcribe it according to `options`.
    ///
    /// Never returns an error; failures are reported in the result.
    pub async fn normalize_and_transcribe(
        &self,
        buffer: AudioBuffer,
        options: &TranscriptionOptions,
    ) -> TranscriptionResult {
        let audio = match self.normalizer.normalize(buffer).await {
            Ok(audio) => audio,
            Err(e) => return TranscriptionResult::failed(&e),
        };

        let outcome = self.transcribe_with_fallback(&audio, options).await;
        audio.cleanup();

        match outcome {
            Ok((text, source)) => {
                let text = self.post_process(text, options).await;
                info!(source = %source, chars = text.len(), "Transcription succeeded");
                TranscriptionResult::succeeded(text, source)
            }
            Err(e) if e.is_no_audio() => {
                info!("No speech detected in recording");
                TranscriptionResult::failed(&e)
            }
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Transcription failed");
                TranscriptionResult::failed(&e)
            }
        }
    }

    async fn transcribe_with_fallback(
        &self,
        audio: &NormalizedAudio,
        options: &TranscriptionOptions,
    ) -> Result<(String, TranscriptionSource), DomainError> {
        let config = TranscribeConfig {
            language: options.language.clone(),
            threads: options.threads,
            model: options.model.clone(),
        };
        let primary = options.mode;

        let primary_err = match self.attempt(primary, audio, &config).await {
            Ok(text) => return Ok((text, TranscriptionSource::primary(primary))),
            Err(e) if e.is_no_audio() => return Err(e),
            Err(e) => e,
        };

        if !options.fallback_enabled(primary) {
            debug!(backend = %primary, "Fallback disabled");
            return Err(primary_err);
        }

        let fallback = primary.opposite();
        warn!(
            from = %primary,
            to = %fallback,
            error = %primary_err,
            "Primary backend failed, falling back"
        );
        self.events.emit(PipelineEvent::FallbackAttempted {
            from: primary,
            to: fallback,
            reason: primary_err.to_string(),
        });

        match self.attempt(fallback, audio, &config).await {
            Ok(text) => Ok((text, TranscriptionSource::fallback_for(primary))),
            Err(e) if e.is_no_audio() => Err(e),
            Err(e) => Err(DomainError::FallbackExhausted {
                primary_backend: primary.to_string(),
                primary: Box::new(primary_err),
                fallback_backend: fallback.to_string(),
                fallback: Box::new(e),
            }),
        }
    }

    async fn attempt(
        &self,
        backend: Backend,
        audio: &NormalizedAudio,
        config: &TranscribeConfig,
    ) -> Result<String, DomainError> {
        let transcriber = match backend {
            Backend::Local => &self.local,
            Backend::Cloud => &self.cloud,
        };

        let started = PipelineEvent::TranscriptionStarted { backend };
        self.events.emit(started);
        let start = Instant::now();
        let result = transcriber.transcribe(audio, config).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        self.events.emit(PipelineEvent::TranscriptionFinished {
            backend,
            success: result.is_ok(),
            duration_ms,
        });

        match &result {
            Ok(_) => debug!(backend = %backend, duration_ms, "Backend succeeded"),
            Err(e) => debug!(backend = %backend, duration_ms, error = %e, "Backend failed"),
        }
        result.map(|t| t.text)
    }

    /// Run the reasoning pass if configured. Failures keep the original text.
    async fn post_process(&self, text: String, options: &TranscriptionOptions) -> String {
        let (Some(request), Some(service)) = (&options.reasoning, &self.reasoning) else {
            return text;
        };

        let processed = service
            .process(
                &text,
                &request.model_id,
                &request.agent_name,
                &request.provider,
            )
            .await;
        match processed {
            Ok(processed) if !processed.trim().is_empty() => processed,
            Ok(_) => {
                warn!("Reasoning returned empty text, keeping transcript");
                text
            }
            Err(e) => {
                warn!(error = %e, "Reasoning failed, keeping transcript");
                text
            }
        }
    }
}
