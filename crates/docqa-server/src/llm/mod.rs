pub mod client;
pub mod openai;
pub mod responses;
pub mod router;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use client::LlmClient;
pub use router::{LlmRouter, RetryPolicy};
pub use types::{ChatRequest, ChatRole, PromptMessage, TextStream};
