use std::sync::Arc;

use crate::config::{ApiType, LlmModelConfig, Settings};
use crate::database::{MemoryRepository, Repository};
use crate::document::enricher::ContextualEnricher;
use crate::embedding::build_embedding_client;
use crate::index::milvus::MilvusVectorStore;
use crate::index::{Bm25Index, MemoryVectorStore, VectorStore};
use crate::llm::openai::ChatCompletionsClient;
use crate::llm::responses::ResponsesClient;
use crate::llm::{LlmClient, LlmRouter, RetryPolicy};
use crate::services::{ChatOrchestrator, ContextManager, IngestService, RetrievalEngine};

/// Application state shared across handlers. Everything is injected via
/// constructors; the only process-wide mutable state lives behind the
/// vector store, BM25 tables and repository.
pub struct AppState {
    pub settings: Settings,
    pub repository: Arc<dyn Repository>,
    pub router: Arc<LlmRouter>,
    pub ingest: Arc<IngestService>,
    pub orchestrator: Arc<ChatOrchestrator>,
}

fn build_llm_client(config: &LlmModelConfig) -> Arc<dyn LlmClient> {
    match config.api_type {
        ApiType::Responses => Arc::new(ResponsesClient::new(config.clone())),
        ApiType::Chat => Arc::new(ChatCompletionsClient::new(config.clone())),
    }
}

impl AppState {
    pub fn build(settings: Settings) -> Arc<Self> {
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());

        let vector_store: Arc<dyn VectorStore> = match settings.vector.kind.as_str() {
            "milvus" => Arc::new(MilvusVectorStore::new(&settings.vector.milvus)),
            _ => Arc::new(MemoryVectorStore::new(settings.embedding.dimension)),
        };

        let bm25 = Arc::new(Bm25Index::new());
        let embedding = build_embedding_client(&settings.embedding);

        let primary = build_llm_client(&settings.llm.primary);
        let fallback = settings
            .llm
            .fallback
            .enabled
            .then(|| build_llm_client(&settings.llm.fallback));
        let router = Arc::new(LlmRouter::new(
            primary,
            fallback,
            RetryPolicy {
                max_attempts: settings.llm.retry.max_attempts,
                delay_ms: settings.llm.retry.delay_ms,
                multiplier: settings.llm.retry.multiplier,
            },
        ));

        let enricher = Arc::new(ContextualEnricher::new(router.clone()));

        let ingest = Arc::new(IngestService::new(
            repository.clone(),
            vector_store.clone(),
            bm25.clone(),
            embedding.clone(),
            enricher,
            settings.document.clone(),
            settings.chunking.clone(),
            settings.rag.clone(),
        ));

        let retrieval = Arc::new(RetrievalEngine::new(
            repository.clone(),
            vector_store.clone(),
            bm25.clone(),
            embedding.clone(),
            router.clone(),
            settings.rag.clone(),
        ));

        let context_manager = Arc::new(ContextManager::new(
            repository.clone(),
            router.clone(),
            settings.context.clone(),
        ));

        let orchestrator = Arc::new(ChatOrchestrator::new(
            repository.clone(),
            retrieval,
            context_manager,
            router.clone(),
            settings.context.clone(),
            settings.llm.primary.max_tokens,
        ));

        Arc::new(Self {
            settings,
            repository,
            router,
            ingest,
            orchestrator,
        })
    }
}
