use std::pin::Pin;

use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::utils::error::LlmError;

/// Asynchronous sequence of text deltas. Completes on the provider's
/// terminal sentinel or fails with an [`LlmError`].
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: ChatRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Provider-agnostic chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub model_override: Option<String>,
}

impl ChatRequest {
    /// Single-turn request, the common shape for side-channel calls
    /// (hierarchy prediction, query expansion, summarisation).
    pub fn single(prompt: impl Into<String>, max_tokens: usize, temperature: f32) -> Self {
        Self {
            system: None,
            messages: vec![PromptMessage::user(prompt)],
            max_tokens,
            temperature,
            model_override: None,
        }
    }
}
