use async_trait::async_trait;

use crate::utils::error::LlmError;

use super::types::{ChatRequest, TextStream};

/// Capability interface for chat model providers. Clients are registered
/// under an explicit `kind()` and dispatched by the router.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Registry key, e.g. "openai" or "azure".
    fn kind(&self) -> &str;

    fn model_name(&self) -> &str;

    /// One-shot completion; the full reply text.
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// Streaming completion: ordered non-empty text deltas, completing on
    /// the provider's terminal sentinel.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TextStream, LlmError>;

    /// Cheap health probe.
    async fn available(&self) -> bool;
}
