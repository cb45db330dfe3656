use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::adapters::multipart::MultipartBody;
use crate::adapters::server_supervisor::ServerSupervisor;
use crate::domain::{classify_transcript, DomainError, NormalizedAudio, Transcript};
use crate::ports::{TranscribeConfig, Transcriber};

/// Response of the inference server's `/inference` endpoint.
#[derive(Debug, Deserialize)]
struct InferenceResponse {
    text: Option<String>,
    language: Option<String>,
    error: Option<String>,
}

/// Transcribes through the supervised inference server.
pub struct ServerTranscriber {
    supervisor: ServerSupervisor,
    client: Client,
}

impl ServerTranscriber {
    pub fn new(
        supervisor: ServerSupervisor,
        request_timeout: Duration,
    ) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DomainError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { supervisor, client })
    }

    /// Post `audio_path` to the server listening on `port`.
    pub(crate) async fn transcribe_at(
        &self,
        port: u16,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<Transcript, DomainError> {
        let audio = tokio::fs::read(audio_path).await?;
        let mut form = MultipartBody::new().file("file", "audio.wav", "audio/wav", &audio);
        if let Some(language) = language {
            form = form.text("language", language);
        }
        let (content_type, body) = form
            .text("response_format", "json")
            .text("temperature", "0.0")
            .finish();

        let url = format!("http://127.0.0.1:{}/inference", port);
        debug!(url = %url, bytes = audio.len(), "Sending audio to inference server");

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| DomainError::Network(format!("Inference request failed: {}", e)))?;

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                let message = format!("Failed to read inference response: {}", e);
                return Err(DomainError::Network(message));
            }
        };
        if !status.is_success() {
            return Err(DomainError::Network(format!(
                "Inference server returned {}: {}",
                status,
                text.trim()
            )));
        }

        let parsed: InferenceResponse = serde_json::from_str(&text)
            .map_err(|e| DomainError::ResponseParse(format!("{}: {}", e, text.trim())))?;
        if let Some(error) = parsed.error {
            return Err(DomainError::ResponseParse(format!("Inference server error: {}", error)));
        }
        let Some(text) = parsed.text else {
            return Err(DomainError::ResponseParse("Response has no text field".to_string()));
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let chars = text.len();
        info!(port, duration_ms, chars, "Server transcription completed");

        classify_transcript(Transcript {
            text,
            detected_language: parsed.language,
            duration_ms,
        })
    }
}

#[async_trait]
impl Transcriber for ServerTranscriber {
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        config: &TranscribeConfig,
    ) -> Result<Transcript, DomainError> {
        let port = self.supervisor.ready_port().ok_or(DomainError::NotReady)?;
        self.transcribe_at(port, audio.path(), config.language.as_deref())
            .await
    }
}
