use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::adapters::multipart::MultipartBody;
use crate::domain::config::CloudConfig;
use crate::domain::{classify_transcript, DomainError, NormalizedAudio, Transcript};
use crate::ports::{TranscribeConfig, Transcriber};

/// Environment variable consulted when no key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize)]
struct CloudResponse {
    text: Option<String>,
    language: Option<String>,
    error: Option<CloudError>,
}

#[derive(Debug, Deserialize)]
struct CloudError {
    message: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct CloudTranscriber {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<Zeroizing<String>>,
}

impl CloudTranscriber {
    pub fn new(config: &CloudConfig) -> Result<Self, DomainError> {
        let base_url = match url::Url::parse(&config.base_url) {
            Ok(url) => url,
            Err(e) => {
                let message = format!("Invalid cloud base URL '{}': {}", config.base_url, e);
                return Err(DomainError::Config(message));
            }
        };
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(DomainError::Config(format!(
                "Cloud base URL must be http or https: {}",
                config.base_url
            )));
        }

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .map(Zeroizing::new);

        let client = match Client::builder().timeout(config.request_timeout()).build() {
            Ok(client) => client,
            Err(e) => {
                let message = format!("Failed to create HTTP client: {}", e);
                return Err(DomainError::Network(message));
            }
        };

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Transcriber for CloudTranscriber {
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        config: &TranscribeConfig,
    ) -> Result<Transcript, DomainError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            DomainError::Config(format!(
                "No cloud API key configured (set cloud.api_key or {})",
                API_KEY_ENV
            ))
        })?;

        let bytes = tokio::fs::read(audio.path()).await?;
        let mut form = MultipartBody::new()
            .file("file", "audio.wav", "audio/wav", &bytes)
            .text("model", &self.model)
            .text("response_format", "json");
        if let Some(language) = &config.language {
            form = form.text("language", language);
        }
        let (content_type, body) = form.finish();

        let url = format!("{}/audio/transcriptions", self.base_url);
        debug!(url = %url, model = %self.model, bytes = bytes.len(), "Sending audio to cloud API");

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.as_str())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| DomainError::Network(format!("Cloud request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DomainError::Network(format!("Failed to read cloud response: {}", e)))?;
        if !status.is_success() {
            return Err(DomainError::Network(format!(
                "Cloud API returned {}: {}",
                status,
                text.trim()
            )));
        }

        let parsed: CloudResponse = serde_json::from_str(&text)
            .map_err(|e| DomainError::ResponseParse(format!("{}: {}", e, text.trim())))?;
        if let Some(error) = parsed.error {
            return Err(DomainError::ResponseParse(format!("Cloud API error: {}", error.message)));
        }
        let Some(text) = parsed.text else {
            return Err(DomainError::ResponseParse("Response has no text field".to_string()));
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let chars = text.len();
        info!(duration_ms, chars, "Cloud transcription completed");

        classify_transcript(Transcript {
            text,
            detected_language: parsed.language,
            duration_ms,
        })
    }
}
