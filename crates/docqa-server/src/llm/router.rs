//! Client registry and dispatch.
//!
//! Owns the primary and fallback clients, resolves a client for a
//! requested kind, probes health, and runs the hierarchy-prediction side
//! channel.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::utils::error::LlmError;

use super::client::LlmClient;
use super::types::ChatRequest;

/// Maximum candidate hierarchies offered to the prediction prompt.
const MAX_HIERARCHY_CANDIDATES: usize = 20;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
            multiplier: 2.0,
        }
    }
}

pub struct LlmRouter {
    primary: Arc<dyn LlmClient>,
    fallback: Option<Arc<dyn LlmClient>>,
    retry: RetryPolicy,
}

impl LlmRouter {
    pub fn new(
        primary: Arc<dyn LlmClient>,
        fallback: Option<Arc<dyn LlmClient>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            retry,
        }
    }

    pub fn primary(&self) -> Arc<dyn LlmClient> {
        self.primary.clone()
    }

    pub fn fallback_client(&self) -> Option<Arc<dyn LlmClient>> {
        self.fallback.clone()
    }

    /// Resolve a client by kind (substring match either way); the primary
    /// on miss or when no kind is requested.
    pub fn get_client(&self, kind: Option<&str>) -> Arc<dyn LlmClient> {
        let Some(requested) = kind.map(str::trim).filter(|k| !k.is_empty()) else {
            return self.primary.clone();
        };

        let mut registered: Vec<&Arc<dyn LlmClient>> = vec![&self.primary];
        if let Some(fb) = &self.fallback {
            registered.push(fb);
        }

        for client in registered {
            let name = client.kind();
            if name.contains(requested) || requested.contains(name) {
                return client.clone();
            }
        }

        debug!("no client registered for kind '{}', using primary", requested);
        self.primary.clone()
    }

    /// The fallback for `current`, or `current` itself when no distinct
    /// fallback is configured.
    pub fn fallback_for(&self, current: &Arc<dyn LlmClient>) -> Arc<dyn LlmClient> {
        match &self.fallback {
            Some(fb) if fb.kind() != current.kind() || fb.model_name() != current.model_name() => {
                fb.clone()
            }
            _ => current.clone(),
        }
    }

    /// Non-streaming completion with exponential backoff on retryable
    /// provider failures.
    pub async fn chat_with_retry(
        &self,
        client: &Arc<dyn LlmClient>,
        request: &ChatRequest,
    ) -> Result<String, LlmError> {
        let mut delay = self.retry.delay_ms as f64;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match client.chat(request).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts.max(1) => {
                    warn!(
                        "chat attempt {}/{} failed ({}), retrying in {:.0}ms",
                        attempt, self.retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                    delay *= self.retry.multiplier;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask the model which candidate hierarchy a query belongs to.
    /// Returns the first candidate matching the reply by substring either
    /// way; any failure is non-fatal and yields `None`.
    pub async fn predict_hierarchy(&self, query: &str, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let shortlist = &candidates[..candidates.len().min(MAX_HIERARCHY_CANDIDATES)];

        let mut prompt = String::from(
            "根据用户问题，从以下文档目录层级中选出最相关的一项。\
             只输出该层级原文；如果没有相关项，输出 NONE。\n\n目录层级：\n",
        );
        for candidate in shortlist {
            let _ = writeln!(prompt, "- {}", candidate);
        }
        let _ = write!(prompt, "\n用户问题：{}", query);

        let request = ChatRequest::single(prompt, 50, 0.0);
        let reply = match self.primary.chat(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("hierarchy prediction failed: {}", e);
                return None;
            }
        };

        let cleaned = reply
            .trim()
            .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’'))
            .trim();

        if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("none") {
            return None;
        }

        shortlist
            .iter()
            .find(|c| c.contains(cleaned) || cleaned.contains(c.as_str()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;

    fn router_with(
        primary: ScriptedClient,
        fallback: Option<ScriptedClient>,
    ) -> (LlmRouter, Arc<dyn LlmClient>) {
        let primary: Arc<dyn LlmClient> = Arc::new(primary);
        let router = LlmRouter::new(
            primary.clone(),
            fallback.map(|fb| Arc::new(fb) as Arc<dyn LlmClient>),
            RetryPolicy {
                max_attempts: 1,
                delay_ms: 1,
                multiplier: 1.0,
            },
        );
        (router, primary)
    }

    #[test]
    fn get_client_matches_by_substring() {
        let (router, _) = router_with(
            ScriptedClient::new("openai", "gpt-4o"),
            Some(ScriptedClient::new("dashscope", "qwen-max")),
        );
        assert_eq!(router.get_client(Some("dash")).kind(), "dashscope");
        assert_eq!(router.get_client(Some("openai-chat")).kind(), "openai");
        assert_eq!(router.get_client(Some("unknown")).kind(), "openai");
        assert_eq!(router.get_client(None).kind(), "openai");
    }

    #[test]
    fn fallback_for_skips_identical_client() {
        let (router, primary) = router_with(ScriptedClient::new("openai", "gpt-4o"), None);
        assert_eq!(router.fallback_for(&primary).kind(), "openai");

        let (router, primary) = router_with(
            ScriptedClient::new("openai", "gpt-4o"),
            Some(ScriptedClient::new("dashscope", "qwen-max")),
        );
        assert_eq!(router.fallback_for(&primary).kind(), "dashscope");
    }

    #[tokio::test]
    async fn predict_hierarchy_matches_candidates() {
        let primary = ScriptedClient::new("openai", "gpt-4o");
        primary.push_chat_reply(Ok("\"1.2 体积\"".to_string()));
        let (router, _) = router_with(primary, None);

        let candidates = vec!["1. 基础 > 1.1 质量".to_string(), "1. 基础 > 1.2 体积".to_string()];
        let predicted = router.predict_hierarchy("体积怎么算", &candidates).await;
        assert_eq!(predicted.as_deref(), Some("1. 基础 > 1.2 体积"));
    }

    #[tokio::test]
    async fn predict_hierarchy_none_and_errors_yield_none() {
        let primary = ScriptedClient::new("openai", "gpt-4o");
        primary.push_chat_reply(Ok("NONE".to_string()));
        let (router, _) = router_with(primary, None);
        assert!(router
            .predict_hierarchy("q", &["A".to_string()])
            .await
            .is_none());

        // unscripted chat fails; the failure is swallowed
        let primary = ScriptedClient::new("openai", "gpt-4o");
        let (router, _) = router_with(primary, None);
        assert!(router
            .predict_hierarchy("q", &["A".to_string()])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn chat_with_retry_retries_retryable_errors() {
        use crate::utils::error::LlmErrorKind;

        let primary = ScriptedClient::new("openai", "gpt-4o");
        primary.push_chat_reply(Err(LlmError::new(LlmErrorKind::RateLimit, "slow down")));
        primary.push_chat_reply(Ok("recovered".to_string()));
        let primary: Arc<dyn LlmClient> = Arc::new(primary);

        let router = LlmRouter::new(
            primary.clone(),
            None,
            RetryPolicy {
                max_attempts: 3,
                delay_ms: 1,
                multiplier: 1.0,
            },
        );

        let reply = router
            .chat_with_retry(&primary, &ChatRequest::single("q", 10, 0.0))
            .await
            .unwrap();
        assert_eq!(reply, "recovered");
    }

    #[tokio::test]
    async fn chat_with_retry_gives_up_on_auth() {
        use crate::utils::error::LlmErrorKind;

        let primary = ScriptedClient::new("openai", "gpt-4o");
        primary.push_chat_reply(Err(LlmError::new(LlmErrorKind::Auth, "bad key")));
        primary.push_chat_reply(Ok("never reached".to_string()));
        let primary: Arc<dyn LlmClient> = Arc::new(primary);

        let router = LlmRouter::new(primary.clone(), None, RetryPolicy::default());
        let err = router
            .chat_with_retry(&primary, &ChatRequest::single("q", 10, 0.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Auth);
    }
}
