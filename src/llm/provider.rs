use async_trait::async_trait;

use crate::errors::LocatorResult;
use crate::llm::types::GenerateRequest;

/// Unified LLM provider trait. All providers implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Runs one structured call and returns the raw answer text.
    ///
    /// Permanent refusals must surface as `LocatorError::NonRetryable` so the
    /// caller stops fanning out further votes.
    async fn generate(&self, request: GenerateRequest) -> LocatorResult<String>;
}
