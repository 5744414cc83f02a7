//! Session history with summarisation compaction.
//!
//! Long histories are folded into the session summary: everything except
//! the last `max_history_rounds * 2` messages is summarised by the LLM,
//! appended to the stored summary, and deleted. Context building walks
//! newest-backward under a token budget.

use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::ContextConfig;
use crate::database::models::{ChatMessageRecord, MessageRole};
use crate::database::Repository;
use crate::llm::{ChatRequest, ChatRole, LlmRouter, PromptMessage};
use crate::utils::error::AppError;
use crate::utils::token_estimator;

const SUMMARY_MAX_TOKENS: usize = 500;
const SUMMARY_TEMPERATURE: f32 = 0.3;

pub struct ContextManager {
    repository: Arc<dyn Repository>,
    router: Arc<LlmRouter>,
    config: ContextConfig,
    /// Sessions with a compaction in flight.
    compacting: DashMap<String, ()>,
}

impl ContextManager {
    pub fn new(repository: Arc<dyn Repository>, router: Arc<LlmRouter>, config: ContextConfig) -> Self {
        Self {
            repository,
            router,
            config,
            compacting: DashMap::new(),
        }
    }

    /// Persist a message, bump the session counter, and compact when the
    /// history has grown past `summary_threshold * 2` messages.
    pub async fn save_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: String,
        citations: Option<String>,
    ) -> Result<ChatMessageRecord, AppError> {
        if self
            .repository
            .get_session(session_id)
            .await
            .map_err(AppError::from)?
            .is_none()
        {
            return Err(AppError::NotFound(format!("session {}", session_id)));
        }

        let record = ChatMessageRecord::new(session_id, role, content, citations);
        self.repository
            .insert_message(record.clone())
            .await
            .map_err(AppError::from)?;

        let count = self
            .repository
            .increment_message_count(session_id)
            .await
            .map_err(AppError::from)?;

        // The trigger fires once the history has strictly exceeded the
        // threshold window, leaving exactly the keep-window behind.
        if count > self.config.summary_threshold * 2 {
            self.compact(session_id).await;
        }

        Ok(record)
    }

    /// Compact one session; at most one compaction per session runs at a
    /// time, and failures leave the session untouched.
    async fn compact(&self, session_id: &str) {
        if self.compacting.insert(session_id.to_string(), ()).is_some() {
            debug!("compaction already running for session {}", session_id);
            return;
        }

        let result = self.compact_inner(session_id).await;
        self.compacting.remove(session_id);

        if let Err(e) = result {
            warn!("summary compaction failed for session {}: {}", session_id, e);
        }
    }

    async fn compact_inner(&self, session_id: &str) -> Result<()> {
        let messages = self.repository.get_messages(session_id).await?;
        let keep = self.config.max_history_rounds * 2;
        if messages.len() <= keep {
            return Ok(());
        }

        let cut = messages.len() - keep;
        let compacted = &messages[..cut];

        let transcript = compacted
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "请将以下对话历史压缩成一段简洁的摘要，保留关键事实、结论和未解决的问题，\
             供后续对话参考：\n\n{}",
            transcript
        );
        let request = ChatRequest::single(prompt, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE);
        let summary = self.router.primary().chat(&request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            anyhow::bail!("empty summary reply");
        }

        self.repository
            .apply_compaction(session_id, summary, cut)
            .await?;

        let ids: Vec<String> = compacted.iter().map(|m| m.id.clone()).collect();
        self.repository.delete_messages(session_id, &ids).await?;

        info!(
            "compacted {} messages into the summary for session {}",
            cut, session_id
        );
        Ok(())
    }

    /// Chronological message list trimmed to the token budget, newest
    /// kept. The session summary, when present, leads as a system message
    /// and counts against the budget.
    pub async fn build_context(
        &self,
        session_id: &str,
        token_budget: usize,
    ) -> Result<Vec<PromptMessage>, AppError> {
        let Some(session) = self
            .repository
            .get_session(session_id)
            .await
            .map_err(AppError::from)?
        else {
            return Err(AppError::NotFound(format!("session {}", session_id)));
        };

        let messages = self
            .repository
            .get_messages(session_id)
            .await
            .map_err(AppError::from)?;

        let mut budget = token_budget as i64;
        let mut lead = None;

        if let Some(summary) = session.summary.filter(|s| !s.is_empty()) {
            let content = format!("Previous conversation summary: {}", summary);
            budget -= token_estimator::estimate_tokens(&content) as i64;
            lead = Some(PromptMessage::system(content));
        }

        let mut reversed: Vec<PromptMessage> = Vec::new();
        for message in messages.iter().rev() {
            let cost = message.token_count as i64;
            if budget - cost < 0 {
                break;
            }
            budget -= cost;
            reversed.push(PromptMessage {
                role: match message.role {
                    MessageRole::User => ChatRole::User,
                    MessageRole::Assistant => ChatRole::Assistant,
                    MessageRole::System => ChatRole::System,
                },
                content: message.content.clone(),
            });
        }

        let mut out = Vec::with_capacity(reversed.len() + 1);
        if let Some(lead) = lead {
            out.push(lead);
        }
        out.extend(reversed.into_iter().rev());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ChatSession;
    use crate::database::MemoryRepository;
    use crate::llm::testing::ScriptedClient;
    use crate::llm::{LlmClient, RetryPolicy};

    struct Fixture {
        repository: Arc<MemoryRepository>,
        primary: Arc<ScriptedClient>,
        manager: ContextManager,
    }

    fn fixture(config: ContextConfig) -> Fixture {
        let repository = Arc::new(MemoryRepository::new());
        let primary = Arc::new(ScriptedClient::new("openai", "gpt-4o"));
        let client: Arc<dyn LlmClient> = primary.clone();
        let manager = ContextManager::new(
            repository.clone(),
            Arc::new(LlmRouter::new(client, None, RetryPolicy::default())),
            config,
        );
        Fixture {
            repository,
            primary,
            manager,
        }
    }

    async fn new_session(repository: &MemoryRepository) -> String {
        let session = ChatSession::new(vec![]);
        let id = session.id.clone();
        repository.insert_session(session).await.unwrap();
        id
    }

    #[tokio::test]
    async fn seven_messages_compact_the_first_three() {
        // summaryThreshold = 3, maxHistoryRounds = 2
        let fx = fixture(ContextConfig {
            max_history_rounds: 2,
            max_context_tokens: 4000,
            summary_threshold: 3,
        });
        let session_id = new_session(&fx.repository).await;

        fx.primary.push_chat_reply(Ok("早期对话的摘要".to_string()));

        for i in 0..7 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            fx.manager
                .save_message(&session_id, role, format!("message {}", i), None)
                .await
                .unwrap();
        }

        let remaining = fx.repository.get_messages(&session_id).await.unwrap();
        assert_eq!(remaining.len(), 4, "keep the last maxHistoryRounds*2");
        assert_eq!(remaining[0].content, "message 3");

        let session = fx.repository.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.summary.as_deref(), Some("早期对话的摘要"));
        assert_eq!(session.message_count, 4);

        // subsequent context builds lead with the summary then the raw tail
        let context = fx.manager.build_context(&session_id, 4000).await.unwrap();
        assert_eq!(context.len(), 5);
        assert_eq!(context[0].role, ChatRole::System);
        assert!(context[0].content.contains("早期对话的摘要"));
        assert_eq!(context[1].content, "message 3");
        assert_eq!(context[4].content, "message 6");
    }

    #[tokio::test]
    async fn compaction_failure_leaves_state_untouched() {
        let fx = fixture(ContextConfig {
            max_history_rounds: 2,
            max_context_tokens: 4000,
            summary_threshold: 3,
        });
        let session_id = new_session(&fx.repository).await;

        // no scripted reply: the summary call fails
        for i in 0..7 {
            fx.manager
                .save_message(&session_id, MessageRole::User, format!("m{}", i), None)
                .await
                .unwrap();
        }

        let messages = fx.repository.get_messages(&session_id).await.unwrap();
        assert_eq!(messages.len(), 7);
        let session = fx.repository.get_session(&session_id).await.unwrap().unwrap();
        assert!(session.summary.is_none());
        assert_eq!(session.message_count, 7);
    }

    #[tokio::test]
    async fn context_respects_token_budget() {
        let fx = fixture(ContextConfig::default());
        let session_id = new_session(&fx.repository).await;

        for i in 0..6 {
            // ~25 tokens per message ("wordwordword..." 100 chars)
            fx.manager
                .save_message(&session_id, MessageRole::User, format!("{}{}", "w".repeat(99), i), None)
                .await
                .unwrap();
        }

        let budget = 60;
        let context = fx.manager.build_context(&session_id, budget).await.unwrap();

        let spent: usize = context
            .iter()
            .map(|m| token_estimator::estimate_tokens(&m.content))
            .sum();
        assert!(spent <= budget, "spent {} of {}", spent, budget);
        assert!(!context.is_empty());
        // newest messages survive
        assert!(context.last().unwrap().content.ends_with('5'));
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let fx = fixture(ContextConfig::default());
        let err = fx
            .manager
            .save_message("nope", MessageRole::User, "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
