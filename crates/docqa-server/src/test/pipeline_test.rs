//! End-to-end pipeline checks over the in-memory stack: upload bytes in,
//! streamed grounded answers out.

use std::sync::Arc;

use futures::StreamExt;

use crate::config::{ChunkingSettings, ContextConfig, DocumentConfig, RagConfig};
use crate::database::models::{ChatSession, DocumentStatus};
use crate::database::{MemoryRepository, Repository};
use crate::document::enricher::ContextualEnricher;
use crate::embedding::MockEmbeddingClient;
use crate::index::{Bm25Index, MemoryVectorStore, VectorStore};
use crate::llm::testing::{ScriptedClient, StreamScript};
use crate::llm::{LlmClient, LlmRouter, RetryPolicy};
use crate::models::ChatChunk;
use crate::services::{ChatAsk, ChatOrchestrator, ContextManager, IngestService, RetrievalEngine};

const DIMENSION: usize = 8;

struct Stack {
    repository: Arc<MemoryRepository>,
    vector_store: Arc<MemoryVectorStore>,
    bm25: Arc<Bm25Index>,
    primary: Arc<ScriptedClient>,
    fallback: Arc<ScriptedClient>,
    ingest: IngestService,
    retrieval: Arc<RetrievalEngine>,
    orchestrator: ChatOrchestrator,
}

fn stack(rag: RagConfig) -> Stack {
    let repository = Arc::new(MemoryRepository::new());
    let vector_store = Arc::new(MemoryVectorStore::new(DIMENSION));
    let bm25 = Arc::new(Bm25Index::new());
    let embedder = Arc::new(MockEmbeddingClient::new(DIMENSION));
    let primary = Arc::new(ScriptedClient::new("openai", "gpt-4o"));
    let fallback = Arc::new(ScriptedClient::new("dashscope", "qwen-max"));

    let router = Arc::new(LlmRouter::new(
        primary.clone() as Arc<dyn LlmClient>,
        Some(fallback.clone() as Arc<dyn LlmClient>),
        RetryPolicy {
            max_attempts: 1,
            delay_ms: 1,
            multiplier: 1.0,
        },
    ));

    let document_config = DocumentConfig {
        storage_path: std::env::temp_dir()
            .join(format!("docqa-e2e-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string(),
        ..DocumentConfig::default()
    };

    let ingest = IngestService::new(
        repository.clone(),
        vector_store.clone(),
        bm25.clone(),
        embedder.clone(),
        Arc::new(ContextualEnricher::new(router.clone())),
        document_config,
        ChunkingSettings {
            chunk_size: 500,
            chunk_overlap: 50,
            min_chunk_size: 3,
        },
        rag.clone(),
    );

    let retrieval = Arc::new(RetrievalEngine::new(
        repository.clone(),
        vector_store.clone(),
        bm25.clone(),
        embedder,
        router.clone(),
        rag,
    ));

    let context_manager = Arc::new(ContextManager::new(
        repository.clone(),
        router.clone(),
        ContextConfig::default(),
    ));

    let orchestrator = ChatOrchestrator::new(
        repository.clone(),
        retrieval.clone(),
        context_manager,
        router,
        ContextConfig::default(),
        1024,
    );

    Stack {
        repository,
        vector_store,
        bm25,
        primary,
        fallback,
        ingest,
        retrieval,
        orchestrator,
    }
}

async fn ingest_markdown(stack: &Stack, filename: &str, content: &[u8]) -> String {
    let doc = stack.ingest.create_document(filename, content).await.unwrap();
    stack
        .ingest
        .process_document(&doc.id, content.to_vec(), true)
        .await;
    let stored = stack.repository.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Ready);
    doc.id
}

async fn new_session(stack: &Stack, document_ids: Vec<String>) -> String {
    let session = ChatSession::new(document_ids);
    let id = session.id.clone();
    stack.repository.insert_session(session).await.unwrap();
    id
}

const GUIDE_MD: &[u8] = b"# Intro\n\nHello world.\n\n# Usage\n\nRun it.\n";

#[tokio::test]
async fn markdown_small_doc_hybrid_ranking() {
    // bypass the shortcut so the hybrid path runs
    let stack = stack(RagConfig {
        small_document_threshold: 0,
        ..RagConfig::default()
    });

    let doc_id = ingest_markdown(&stack, "guide.md", GUIDE_MD).await;

    let chunks = stack.repository.get_chunks(&doc_id).await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].hierarchy, "Intro");
    assert_eq!(chunks[1].hierarchy, "Usage");

    let retrieved = stack
        .retrieval
        .retrieve("how to run", &[doc_id.clone()])
        .await
        .unwrap();

    // the keyword match on "Run it." ranks first
    assert_eq!(retrieved.citations[0].chunk_id, chunks[1].id);
    assert!(retrieved.context.contains("Run it."));
}

#[tokio::test]
async fn threshold_shortcut_returns_full_document() {
    let stack = stack(RagConfig::default());
    let doc_id = ingest_markdown(&stack, "guide.md", GUIDE_MD).await;

    let retrieved = stack
        .retrieval
        .retrieve("literally any query", &[doc_id])
        .await
        .unwrap();

    assert_eq!(retrieved.citations.len(), 1);
    assert_eq!(retrieved.citations[0].chunk_id, "full-document");
    assert!(retrieved.context.contains("Hello world."));
    assert!(retrieved.context.contains("Run it."));
}

#[tokio::test]
async fn streamed_answer_with_primary_timeout_falls_over() {
    use crate::utils::error::{LlmError, LlmErrorKind};

    let stack = stack(RagConfig::default());
    let doc_id = ingest_markdown(&stack, "guide.md", GUIDE_MD).await;
    let session_id = new_session(&stack, vec![doc_id]).await;

    stack.primary.push_stream(StreamScript::failing_after(
        &["Hel"],
        LlmError::new(LlmErrorKind::Timeout, "read timeout"),
    ));
    stack.fallback.push_stream(StreamScript::ok(&["lo", " world"]));

    let frames: Vec<ChatChunk> = stack
        .orchestrator
        .answer_stream(ChatAsk {
            query: "what does the guide say".into(),
            session_id: session_id.clone(),
            document_id: None,
            model_type: None,
        })
        .collect()
        .await;

    let contents: Vec<&str> = frames.iter().map(|f| f.content.as_str()).collect();
    assert_eq!(contents, vec!["Hel", "", "lo", " world", ""]);
    assert!(frames[1].warning.is_some());
    let terminal = frames.last().unwrap();
    assert!(terminal.complete);
    assert_eq!(
        terminal.citations.as_ref().unwrap()[0].chunk_id,
        "full-document"
    );

    // each frame populates at most one of error/warning
    for frame in &frames {
        assert!(frame.error.is_none() || frame.warning.is_none());
    }

    // exactly one terminal frame, at the end
    assert_eq!(frames.iter().filter(|f| f.complete).count(), 1);
}

#[tokio::test]
async fn delete_then_query_finds_nothing() {
    let stack = stack(RagConfig {
        small_document_threshold: 0,
        ..RagConfig::default()
    });
    let doc_id = ingest_markdown(&stack, "guide.md", GUIDE_MD).await;

    stack.ingest.delete_document(&doc_id).await.unwrap();

    assert_eq!(
        stack.vector_store.count_by_document(&doc_id).await.unwrap(),
        0
    );
    assert_eq!(stack.bm25.chunk_count(&doc_id), 0);

    let retrieved = stack
        .retrieval
        .retrieve("how to run", &[doc_id])
        .await
        .unwrap();
    assert!(retrieved.citations.is_empty());
}

#[tokio::test]
async fn multi_document_context_carries_document_markers() {
    let stack = stack(RagConfig {
        small_document_threshold: 0,
        ..RagConfig::default()
    });

    let first = ingest_markdown(&stack, "alpha.md", b"# One\n\nAlpha topic sentence.\n").await;
    let second = ingest_markdown(&stack, "beta.md", b"# Two\n\nBeta topic sentence.\n").await;

    let retrieved = stack
        .retrieval
        .retrieve("topic sentence", &[first, second])
        .await
        .unwrap();

    assert!(retrieved.context.contains("【文档：alpha.md】"));
    assert!(retrieved.context.contains("【文档：beta.md】"));
}
