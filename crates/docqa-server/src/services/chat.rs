//! End-to-end streaming Q&A.
//!
//! Persists the user turn, retrieves grounded context, selects a prompt
//! template, streams the model reply, fails over to the fallback client
//! with a user-visible warning, and closes with a terminal frame carrying
//! the citations.

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::Stream;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::ContextConfig;
use crate::database::models::{ChatSession, MessageRole};
use crate::database::Repository;
use crate::llm::{ChatRequest, ChatRole, LlmRouter, PromptMessage};
use crate::models::ChatChunk;
use crate::services::context_manager::ContextManager;
use crate::services::retrieval::RetrievalEngine;

const ANSWER_TEMPERATURE: f32 = 0.7;

static SUMMARY_INTENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(总结|概括|主要内容|讲了什么|介绍一下|大纲|summary|overview)")
        .expect("summary intent regex")
});

#[derive(Debug, Clone)]
pub struct ChatAsk {
    pub query: String,
    pub session_id: String,
    /// Single id or CSV of ids.
    pub document_id: Option<String>,
    pub model_type: Option<String>,
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    repository: Arc<dyn Repository>,
    retrieval: Arc<RetrievalEngine>,
    context: Arc<ContextManager>,
    router: Arc<LlmRouter>,
    config: ContextConfig,
    answer_max_tokens: usize,
}

impl ChatOrchestrator {
    pub fn new(
        repository: Arc<dyn Repository>,
        retrieval: Arc<RetrievalEngine>,
        context: Arc<ContextManager>,
        router: Arc<LlmRouter>,
        config: ContextConfig,
        answer_max_tokens: usize,
    ) -> Self {
        Self {
            repository,
            retrieval,
            context,
            router,
            config,
            answer_max_tokens,
        }
    }

    /// The full answer pipeline as a frame stream. Intermediate frames
    /// carry deltas; the stream ends after exactly one terminal frame.
    pub fn answer_stream(&self, ask: ChatAsk) -> Pin<Box<dyn Stream<Item = ChatChunk> + Send>> {
        let this = self.clone();

        Box::pin(async_stream::stream! {
            let session = match this.repository.get_session(&ask.session_id).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    yield ChatChunk::error(format!("session {} not found", ask.session_id));
                    return;
                }
                Err(e) => {
                    yield ChatChunk::error(e.to_string());
                    return;
                }
            };

            if let Err(e) = this
                .context
                .save_message(&session.id, MessageRole::User, ask.query.clone(), None)
                .await
            {
                yield ChatChunk::error(e.to_string());
                return;
            }

            let document_ids = resolve_document_ids(ask.document_id.as_deref(), &session);
            info!(
                "chat: session={} documents={:?} model={:?}",
                session.id, document_ids, ask.model_type
            );

            let retrieved = match this.retrieval.retrieve(&ask.query, &document_ids).await {
                Ok(retrieved) => retrieved,
                Err(e) => {
                    warn!("retrieval failed: {}", e);
                    yield ChatChunk::error(e.to_string());
                    return;
                }
            };

            let system_prompt =
                build_system_prompt(&ask.query, &retrieved.context, !document_ids.is_empty());

            let budget = this.config.max_context_tokens / 2;
            let mut messages = match this.context.build_context(&session.id, budget).await {
                Ok(messages) => messages,
                Err(e) => {
                    yield ChatChunk::error(e.to_string());
                    return;
                }
            };
            // The user turn was already persisted; append it only when the
            // budget trimmed it away.
            let has_current = messages
                .last()
                .map(|m| m.role == ChatRole::User && m.content == ask.query)
                .unwrap_or(false);
            if !has_current {
                messages.push(PromptMessage::user(ask.query.clone()));
            }

            let request = ChatRequest {
                system: Some(system_prompt),
                messages,
                max_tokens: this.answer_max_tokens,
                temperature: ANSWER_TEMPERATURE,
                model_override: None,
            };

            let client = this.router.get_client(ask.model_type.as_deref());
            let mut answer = String::new();
            let mut primary_error = None;

            match client.stream_chat(&request).await {
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(delta) => {
                                answer.push_str(&delta);
                                yield ChatChunk::delta(delta);
                            }
                            Err(e) => {
                                primary_error = Some(e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => primary_error = Some(e),
            }

            if let Some(primary_error) = primary_error {
                let fallback = this.router.fallback_for(&client);
                let same_client = fallback.kind() == client.kind()
                    && fallback.model_name() == client.model_name();

                if same_client {
                    yield ChatChunk::error(primary_error.to_string());
                    return;
                }

                warn!(
                    "primary stream failed ({}), switching {} -> {}",
                    primary_error,
                    client.model_name(),
                    fallback.model_name()
                );
                yield ChatChunk::warning(format!(
                    "模型 {} 暂时不可用，已切换到备用模型 {}。",
                    client.model_name(),
                    fallback.model_name()
                ));

                let mut fallback_error = None;
                match fallback.stream_chat(&request).await {
                    Ok(mut stream) => {
                        while let Some(item) = stream.next().await {
                            match item {
                                Ok(delta) => {
                                    answer.push_str(&delta);
                                    yield ChatChunk::delta(delta);
                                }
                                Err(e) => {
                                    fallback_error = Some(e);
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => fallback_error = Some(e),
                }

                if let Some(fallback_error) = fallback_error {
                    yield ChatChunk::error(fallback_error.to_string());
                    return;
                }
            }

            let citations_json = serde_json::to_string(&retrieved.citations).ok();
            if let Err(e) = this
                .context
                .save_message(&session.id, MessageRole::Assistant, answer, citations_json)
                .await
            {
                warn!("failed to persist assistant turn: {}", e);
            }

            yield ChatChunk::complete(retrieved.citations);
        })
    }

    /// One-shot variant: drains the stream into a single terminal chunk
    /// with the accumulated answer.
    pub async fn answer_once(&self, ask: ChatAsk) -> ChatChunk {
        let mut stream = self.answer_stream(ask);
        let mut content = String::new();
        let mut terminal = ChatChunk::complete(Vec::new());

        while let Some(chunk) = stream.next().await {
            if chunk.complete {
                terminal = chunk;
                break;
            }
            content.push_str(&chunk.content);
        }

        terminal.content = content;
        terminal
    }
}

/// Document ids come from the request when present and not the literal
/// "null"; otherwise from the session. CSV values are split and trimmed.
fn resolve_document_ids(requested: Option<&str>, session: &ChatSession) -> Vec<String> {
    match requested {
        Some(raw) if !raw.trim().is_empty() && raw.trim() != "null" => raw
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect(),
        _ => session.document_ids.clone(),
    }
}

fn build_system_prompt(query: &str, context: &str, has_documents: bool) -> String {
    if !context.is_empty() && SUMMARY_INTENT_RE.is_match(query) {
        return format!(
            "你是一个文档助手。请基于以下文档内容，对文档进行整体总结：\
             归纳主要主题、关键结论和整体结构，语言简洁清晰。\n\n文档内容：\n{}",
            context
        );
    }
    if !context.is_empty() {
        return format!(
            "你是一个文档问答助手。请严格根据以下检索到的文档内容回答用户问题，\
             并在回答末尾标注引用编号（如 [1]）。如果内容中没有答案，明确说明。\n\n\
             检索到的内容：\n{}",
            context
        );
    }
    if has_documents {
        return "你是一个文档问答助手。当前文档中没有检索到与问题相关的内容，\
                请告知用户并建议换一种问法或确认文档是否包含该信息。"
            .to_string();
    }
    "你是一个乐于助人的 AI 助手，请自然地回答用户的问题。".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextConfig, RagConfig};
    use crate::database::models::{Document, DocumentStatus, DocumentType};
    use crate::database::MemoryRepository;
    use crate::embedding::MockEmbeddingClient;
    use crate::index::{Bm25Index, MemoryVectorStore};
    use crate::llm::testing::{ScriptedClient, StreamScript};
    use crate::llm::{LlmClient, RetryPolicy};
    use crate::utils::error::{LlmError, LlmErrorKind};

    struct Fixture {
        repository: Arc<MemoryRepository>,
        primary: Arc<ScriptedClient>,
        fallback: Arc<ScriptedClient>,
        orchestrator: ChatOrchestrator,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(MemoryRepository::new());
        let primary = Arc::new(ScriptedClient::new("openai", "gpt-4o"));
        let fallback = Arc::new(ScriptedClient::new("dashscope", "qwen-max"));

        let router = Arc::new(LlmRouter::new(
            primary.clone() as Arc<dyn LlmClient>,
            Some(fallback.clone() as Arc<dyn LlmClient>),
            RetryPolicy::default(),
        ));

        let retrieval = Arc::new(RetrievalEngine::new(
            repository.clone(),
            Arc::new(MemoryVectorStore::new(8)),
            Arc::new(Bm25Index::new()),
            Arc::new(MockEmbeddingClient::new(8)),
            router.clone(),
            RagConfig::default(),
        ));

        let context = Arc::new(ContextManager::new(
            repository.clone(),
            router.clone(),
            ContextConfig::default(),
        ));

        let orchestrator = ChatOrchestrator::new(
            repository.clone(),
            retrieval,
            context,
            router,
            ContextConfig::default(),
            1024,
        );

        Fixture {
            repository,
            primary,
            fallback,
            orchestrator,
        }
    }

    async fn session_with_document(fx: &Fixture) -> String {
        let mut doc = Document::new("tiny.md".into(), DocumentType::Md, 10, "/tmp/tiny.md".into());
        doc.id = "doc-1".into();
        doc.status = DocumentStatus::Ready;
        doc.chunk_count = 1;
        doc.full_text = Some("Hello world.".into());
        fx.repository.insert_document(doc).await.unwrap();

        let session = ChatSession::new(vec!["doc-1".into()]);
        let id = session.id.clone();
        fx.repository.insert_session(session).await.unwrap();
        id
    }

    #[tokio::test]
    async fn happy_path_streams_deltas_then_terminal_with_citations() {
        let fx = fixture();
        let session_id = session_with_document(&fx).await;

        fx.primary.push_stream(StreamScript::ok(&["Hello", " there"]));

        let chunks: Vec<ChatChunk> = fx
            .orchestrator
            .answer_stream(ChatAsk {
                query: "what is this about".into(),
                session_id: session_id.clone(),
                document_id: None,
                model_type: None,
            })
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "Hello");
        assert_eq!(chunks[1].content, " there");
        assert!(chunks[2].complete);
        let citations = chunks[2].citations.as_ref().unwrap();
        assert_eq!(citations[0].chunk_id, "full-document");

        // both turns persisted
        let messages = fx.repository.get_messages(&session_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hello there");
        assert!(messages[1].citations.is_some());
    }

    #[tokio::test]
    async fn primary_failure_falls_over_with_warning_and_no_delta_loss() {
        let fx = fixture();
        let session_id = session_with_document(&fx).await;

        fx.primary.push_stream(StreamScript::failing_after(
            &["Hel"],
            LlmError::new(LlmErrorKind::Timeout, "read timed out"),
        ));
        fx.fallback
            .push_stream(StreamScript::ok(&["lo", " world"]));

        let chunks: Vec<ChatChunk> = fx
            .orchestrator
            .answer_stream(ChatAsk {
                query: "tell me".into(),
                session_id: session_id.clone(),
                document_id: None,
                model_type: None,
            })
            .collect()
            .await;

        // "Hel", warning, "lo", " world", terminal
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].content, "Hel");
        assert!(chunks[1].warning.as_ref().unwrap().contains("gpt-4o"));
        assert!(chunks[1].warning.as_ref().unwrap().contains("qwen-max"));
        assert!(!chunks[1].complete);
        assert_eq!(chunks[2].content, "lo");
        assert_eq!(chunks[3].content, " world");
        assert!(chunks[4].complete);
        assert!(chunks[4].error.is_none());

        // the persisted answer spans both streams
        let messages = fx.repository.get_messages(&session_id).await.unwrap();
        assert_eq!(messages[1].content, "Hello world");
    }

    #[tokio::test]
    async fn fallback_failure_ends_with_terminal_error() {
        let fx = fixture();
        let session_id = session_with_document(&fx).await;

        fx.primary.push_stream(StreamScript::failing_after(
            &[],
            LlmError::new(LlmErrorKind::Service, "boom"),
        ));
        fx.fallback.push_stream(StreamScript::failing_after(
            &["partial"],
            LlmError::new(LlmErrorKind::Service, "also boom"),
        ));

        let chunks: Vec<ChatChunk> = fx
            .orchestrator
            .answer_stream(ChatAsk {
                query: "q".into(),
                session_id,
                document_id: None,
                model_type: None,
            })
            .collect()
            .await;

        let terminal = chunks.last().unwrap();
        assert!(terminal.complete);
        assert!(terminal.error.is_some());
        // exactly one terminal frame
        assert_eq!(chunks.iter().filter(|c| c.complete).count(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_a_terminal_error() {
        let fx = fixture();
        let chunks: Vec<ChatChunk> = fx
            .orchestrator
            .answer_stream(ChatAsk {
                query: "q".into(),
                session_id: "missing".into(),
                document_id: None,
                model_type: None,
            })
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].complete);
        assert!(chunks[0].error.is_some());
    }

    #[tokio::test]
    async fn answer_once_accumulates_content() {
        let fx = fixture();
        let session_id = session_with_document(&fx).await;

        fx.primary.push_stream(StreamScript::ok(&["full ", "answer"]));

        let chunk = fx
            .orchestrator
            .answer_once(ChatAsk {
                query: "q".into(),
                session_id,
                document_id: None,
                model_type: None,
            })
            .await;

        assert!(chunk.complete);
        assert_eq!(chunk.content, "full answer");
    }

    #[test]
    fn document_id_resolution_rules() {
        let session = ChatSession::new(vec!["s1".into(), "s2".into()]);

        assert_eq!(
            resolve_document_ids(Some("a, b ,c"), &session),
            vec!["a", "b", "c"]
        );
        assert_eq!(resolve_document_ids(Some("null"), &session), vec!["s1", "s2"]);
        assert_eq!(resolve_document_ids(Some("  "), &session), vec!["s1", "s2"]);
        assert_eq!(resolve_document_ids(None, &session), vec!["s1", "s2"]);
    }

    #[test]
    fn system_prompt_template_selection() {
        let grounded = build_system_prompt("问题", "some context", true);
        assert!(grounded.contains("检索到的内容"));

        let summary = build_system_prompt("帮我总结一下这个文档", "some context", true);
        assert!(summary.contains("整体总结"));

        let summary_en = build_system_prompt("give me an OVERVIEW", "ctx", true);
        assert!(summary_en.contains("整体总结"));

        let no_hits = build_system_prompt("问题", "", true);
        assert!(no_hits.contains("没有检索到"));

        let open = build_system_prompt("问题", "", false);
        assert!(open.contains("AI 助手"));
    }
}
