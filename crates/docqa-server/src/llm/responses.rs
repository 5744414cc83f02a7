//! Responses-style client: `input`/`instructions` request shape, streamed
//! `delta` events terminated by `response.completed`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmModelConfig;
use crate::utils::error::LlmError;

use super::client::LlmClient;
use super::types::{ChatRequest, TextStream};

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponsesBody<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    max_output_tokens: usize,
    temperature: f32,
    stream: bool,
}

pub struct ResponsesClient {
    client: Client,
    config: LlmModelConfig,
}

impl ResponsesClient {
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
            Some(version) => format!("{}/responses?api-version={}", base, version),
            None => format!("{}/responses", base),
        }
    }

    fn request_builder(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        if self.config.api_version.is_some() {
            builder.header("api-key", &self.config.api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }

    fn body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> ResponsesBody<'a> {
        ResponsesBody {
            model: request.model_override.as_deref().unwrap_or(&self.config.model),
            input: request
                .messages
                .iter()
                .map(|m| InputMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            instructions: request.system.as_deref(),
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }

    /// Pull the reply text out of a non-streaming response body:
    /// `output[0].content[0].text`.
    fn extract_text(value: &Value) -> Option<String> {
        value
            .get("output")?
            .as_array()?
            .first()?
            .get("content")?
            .as_array()?
            .first()?
            .get("text")?
            .as_str()
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl LlmClient for ResponsesClient {
    fn kind(&self) -> &str {
        &self.config.kind
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        debug!(model = %self.config.model, "responses request");

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

        let parsed: Value = response.json().await.map_err(LlmError::from_reqwest)?;
        Ok(Self::extract_text(&parsed).unwrap_or_default())
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<TextStream, LlmError> {
        debug!(model = %self.config.model, "responses stream");

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
                    let Ok(event) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };

                    let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
                    if event_type == "response.completed" {
                        return;
                    }
                    if let Some(delta) = event.get("delta").and_then(|d| d.as_str()) {
                        if !delta.is_empty() {
                            yield Ok(delta.to_string());
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
