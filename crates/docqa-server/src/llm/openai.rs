//! Chat Completions-style client (OpenAI, Azure OpenAI, DashScope
//! compatible mode). Streams SSE `delta.content` frames terminated by the
//! `[DONE]` sentinel.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmModelConfig;
use crate::utils::error::LlmError;

use super::client::LlmClient;
use super::types::{ChatRequest, TextStream};

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

pub struct ChatCompletionsClient {
    client: Client,
    config: LlmModelConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmModelConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn url(&self) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        match &self.config.api_version {
            Some(version) => format!("{}/chat/completions?api-version={}", base, version),
            None => format!("{}/chat/completions", base),
        }
    }

    fn request_builder(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        // Azure-style deployments authenticate with the api-key header,
        // everything else with a bearer token.
        if self.config.api_version.is_some() {
            builder.header("api-key", &self.config.api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }

    fn body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> CompletionBody<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        for message in &request.messages {
            messages.push(WireMessage {
                role: message.role.as_str(),
                content: &message.content,
            });
        }

        CompletionBody {
            model: request.model_override.as_deref().unwrap_or(&self.config.model),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    fn kind(&self) -> &str {
        &self.config.kind
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        debug!(model = %self.config.model, "chat completion request");

        let response = self
            .request_builder(&self.url())
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, body));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(LlmError::from_reqwest)?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<TextStream, LlmError> {
        debug!(model = %self.config.model, "chat completion stream");

        let response = self
            .request_builder(&self.url())
            .json(&self.body(request, true))
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, body));
        }

        let mut bytes = response.bytes_stream();

        // Reassemble SSE lines across read boundaries before parsing;
        // frames regularly split mid-line on the wire.
        let stream = async_stream::stream! {
            let mut buf = String::new();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LlmError::from_reqwest(e));
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buf.find('\n') {
                    let line = buf[..newline].trim_end_matches('\r').to_string();
                    buf.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    if let Ok(parsed) = serde_json::from_str::<CompletionChunk>(data) {
                        if let Some(content) =
                            parsed.choices.first().and_then(|c| c.delta.content.clone())
                        {
                            if !content.is_empty() {
                                yield Ok(content);
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn available(&self) -> bool {
        let base = self.config.endpoint.trim_end_matches('/');
        let url = format!("{}/models", base);
        match self.client.get(&url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(_) => false,
        }
    }
}
