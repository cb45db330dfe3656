use async_trait::async_trait;

use crate::domain::DomainError;

/// Port for the text post-processing service.
///
/// Failures are soft: the orchestrator keeps the original transcript.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn process(
        &self,
        text: &str,
        model_id: &str,
        agent_name: &str,
        provider: &str,
    ) -> Result<String, DomainError>;
}
