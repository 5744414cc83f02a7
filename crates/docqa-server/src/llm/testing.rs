//! Scripted LLM client used as the test double across the crate.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::utils::error::{LlmError, LlmErrorKind};

use super::client::LlmClient;
use super::types::{ChatRequest, TextStream};

/// One scripted streaming reply: deltas in order, then an optional
/// terminal error.
#[derive(Debug, Clone)]
pub struct StreamScript {
    pub deltas: Vec<String>,
    pub error: Option<LlmError>,
}

impl StreamScript {
    pub fn ok(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            error: None,
        }
    }

    pub fn failing_after(deltas: &[&str], error: LlmError) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            error: Some(error),
        }
    }
}

pub struct ScriptedClient {
    kind: String,
    model: String,
    chat_replies: Mutex<VecDeque<Result<String, LlmError>>>,
    stream_scripts: Mutex<VecDeque<StreamScript>>,
    /// Prompts seen by `chat`, for assertions.
    pub chat_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new(kind: &str, model: &str) -> Self {
        Self {
            kind: kind.to_string(),
            model: model.to_string(),
            chat_replies: Mutex::new(VecDeque::new()),
            stream_scripts: Mutex::new(VecDeque::new()),
            chat_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_chat_reply(&self, reply: Result<String, LlmError>) {
        self.chat_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.stream_scripts.lock().unwrap().push_back(script);
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.chat_requests.lock().unwrap().push(request.clone());
        self.chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::new(
                    LlmErrorKind::Service,
                    "no scripted chat reply",
                ))
            })
    }

    async fn stream_chat(&self, _request: &ChatRequest) -> Result<TextStream, LlmError> {
        let script = self
            .stream_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StreamScript {
                deltas: Vec::new(),
                error: None,
            });

        let stream = async_stream::stream! {
            for delta in script.deltas {
                yield Ok(delta);
            }
            if let Some(error) = script.error {
                yield Err(error);
            }
        };

        Ok(Box::pin(stream))
    }

    async fn available(&self) -> bool {
        true
    }
}
