use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use crate::domain::DomainError;
use crate::ports::HealthCheck;

/// Liveness check against the inference server's root page.
pub struct HttpHealthCheck {
    client: Client,
}

impl HttpHealthCheck {
    pub fn new(timeout: Duration) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn is_live(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}/", port);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                trace!(port, error = %e, "Health check failed");
                false
            }
        }
    }
}
