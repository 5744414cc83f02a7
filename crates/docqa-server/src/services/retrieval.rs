//! Hybrid retrieval engine.
//!
//! Dense vector search with a router-predicted hierarchy pre-filter (and
//! fallback), BM25 on the original query, Reciprocal-Rank-Fusion merging,
//! and a full-text shortcut for small documents.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::database::Repository;
use crate::embedding::EmbeddingClient;
use crate::index::{Bm25Hit, Bm25Index, ChunkMetadata, SearchFilter, VectorHit, VectorStore};
use crate::llm::{ChatRequest, LlmRouter};
use crate::models::Citation;
use crate::utils::error::AppError;

const RRF_K: f32 = 60.0;
const MAX_CITATIONS: usize = 5;
const CITATION_EXCERPT_CHARS: usize = 300;
const SHORTCUT_EXCERPT_CHARS: usize = 200;
const EXPANSION_QUERY_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub context: String,
    pub citations: Vec<Citation>,
}

/// A chunk after rank fusion. Metadata comes from the dense hit when the
/// chunk appeared in both lists.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

pub struct RetrievalEngine {
    repository: Arc<dyn Repository>,
    vector_store: Arc<dyn VectorStore>,
    bm25: Arc<Bm25Index>,
    embedder: Arc<dyn EmbeddingClient>,
    router: Arc<LlmRouter>,
    config: RagConfig,
}

impl RetrievalEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        vector_store: Arc<dyn VectorStore>,
        bm25: Arc<Bm25Index>,
        embedder: Arc<dyn EmbeddingClient>,
        router: Arc<LlmRouter>,
        config: RagConfig,
    ) -> Self {
        Self {
            repository,
            vector_store,
            bm25,
            embedder,
            router,
            config,
        }
    }

    /// Retrieve grounded context for a query over the given documents.
    /// With no documents there is nothing to retrieve and the orchestrator
    /// falls through to open chat.
    pub async fn retrieve(
        &self,
        query: &str,
        document_ids: &[String],
    ) -> Result<RetrievedContext, AppError> {
        if document_ids.is_empty() {
            return Ok(RetrievedContext::default());
        }

        let single_doc = document_ids.len() == 1;

        if single_doc {
            if let Some(shortcut) = self.small_document_shortcut(&document_ids[0]).await? {
                return Ok(shortcut);
            }
        }

        // Expansion is concatenated for the dense leg only; exact-keyword
        // recall stays with the original query.
        let mut dense_query = query.to_string();
        if single_doc && query.chars().count() <= EXPANSION_QUERY_MAX_CHARS {
            if let Some(expansion) = self.expand_query(query).await {
                dense_query = format!("{}\n{}", query, expansion);
            }
        }

        let dense_hits = self.dense_search(&dense_query, query, document_ids).await?;

        let bm25_hits = if single_doc {
            self.bm25.search(&document_ids[0], query, self.config.top_k)
        } else {
            self.bm25.search_many(document_ids, query, self.config.top_k)
        };

        debug!(
            "hybrid search: {} dense hits, {} bm25 hits",
            dense_hits.len(),
            bm25_hits.len()
        );

        let fused = rrf_fuse(&dense_hits, &bm25_hits, self.config.top_k);
        Ok(assemble(&fused, document_ids.len() > 1))
    }

    /// Full text instead of retrieval when the document is small enough.
    async fn small_document_shortcut(
        &self,
        document_id: &str,
    ) -> Result<Option<RetrievedContext>, AppError> {
        let Some(doc) = self
            .repository
            .get_document(document_id)
            .await
            .map_err(AppError::from)?
        else {
            return Ok(None);
        };

        if doc.chunk_count > self.config.small_document_threshold {
            return Ok(None);
        }
        let Some(full_text) = doc.full_text.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        info!(
            "small-document shortcut for {} ({} chunks)",
            document_id, doc.chunk_count
        );

        let citation = Citation {
            chunk_id: "full-document".to_string(),
            document_id: document_id.to_string(),
            document_name: doc.filename,
            page_number: None,
            excerpt: truncate_chars(&full_text, SHORTCUT_EXCERPT_CHARS),
            score: 1.0,
        };

        Ok(Some(RetrievedContext {
            context: full_text,
            citations: vec![citation],
        }))
    }

    /// Rephrase short queries into a fuller form. Non-fatal; `None` keeps
    /// the query unchanged.
    async fn expand_query(&self, query: &str) -> Option<String> {
        let prompt = format!(
            "将下面的问题改写成一条更完整的检索查询，补充同义词和相关表述，\
             直接输出改写结果，不要解释。\n\n问题：{}",
            query
        );
        let request = ChatRequest::single(prompt, 100, 0.3);

        match self.router.primary().chat(&request).await {
            Ok(reply) => {
                let expansion = reply.trim().to_string();
                if expansion.is_empty() {
                    None
                } else {
                    debug!("query expanded: {}", expansion);
                    Some(expansion)
                }
            }
            Err(e) => {
                warn!("query expansion failed: {}", e);
                None
            }
        }
    }

    /// Dense search with the router's hierarchy pre-filter. Falls back to
    /// an unfiltered search when the filtered result set looks too thin.
    async fn dense_search(
        &self,
        dense_query: &str,
        original_query: &str,
        document_ids: &[String],
    ) -> Result<Vec<VectorHit>, AppError> {
        let embedding = self
            .embedder
            .embed(dense_query)
            .await
            .map_err(AppError::Llm)?;

        let single_doc = document_ids.len() == 1;
        let mut predicted = None;
        if single_doc {
            let hierarchies = self
                .repository
                .distinct_hierarchies(&document_ids[0])
                .await
                .map_err(AppError::from)?;
            predicted = self
                .router
                .predict_hierarchy(original_query, &hierarchies)
                .await;
        }

        let filter =
            SearchFilter::for_documents(document_ids).with_hierarchy(predicted.clone());

        let hits = self
            .vector_store
            .search(&embedding, self.config.top_k, &filter)
            .await
            .map_err(AppError::from)?;

        if single_doc && predicted.is_some() && self.should_fall_back(&hits) {
            info!(
                "hierarchy filter '{}' too thin ({} hits), retrying unfiltered",
                predicted.as_deref().unwrap_or(""),
                hits.len()
            );
            let unfiltered = SearchFilter::for_documents(document_ids);
            return self
                .vector_store
                .search(&embedding, self.config.top_k, &unfiltered)
                .await
                .map_err(AppError::from);
        }

        Ok(hits)
    }

    fn should_fall_back(&self, hits: &[VectorHit]) -> bool {
        if hits.is_empty() {
            return true;
        }
        if hits.len() < (self.config.top_k / 2).max(2) {
            return true;
        }
        let top_score = hits.first().map(|h| h.score).unwrap_or(0.0);
        top_score < self.config.similarity_threshold * 1.2
    }
}

/// Reciprocal Rank Fusion: each list contributes `1 / (K + rank)` per
/// chunk; scores merge by chunk id. Commutative, and fusing with an empty
/// list preserves the other list's order.
pub fn rrf_fuse(dense: &[VectorHit], lexical: &[Bm25Hit], top_k: usize) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for (rank, hit) in dense.iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
        fused
            .entry(hit.id.clone())
            .and_modify(|f| f.score += contribution)
            .or_insert_with(|| FusedHit {
                chunk_id: hit.id.clone(),
                document_id: hit.document_id.clone(),
                content: hit.content.clone(),
                metadata: hit.metadata.clone(),
                score: contribution,
            });
    }

    for (rank, hit) in lexical.iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
        fused
            .entry(hit.chunk_id.clone())
            .and_modify(|f| f.score += contribution)
            .or_insert_with(|| FusedHit {
                chunk_id: hit.chunk_id.clone(),
                document_id: hit.document_id.clone(),
                content: hit.content.clone(),
                metadata: hit.metadata.clone(),
                score: contribution,
            });
    }

    let mut merged: Vec<FusedHit> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    merged.truncate(top_k);
    merged
}

/// Numbered context plus at most five citations. RRF scores live in the
/// 0.01–0.03 range, so no threshold is applied after fusion; order carries
/// the signal.
fn assemble(fused: &[FusedHit], multi_doc: bool) -> RetrievedContext {
    let mut context = String::new();
    for (i, hit) in fused.iter().enumerate() {
        if multi_doc {
            context.push_str(&format!(
                "[{}] 【文档：{}】 {}\n\n",
                i + 1,
                hit.metadata.filename,
                hit.content
            ));
        } else {
            context.push_str(&format!("[{}] {}\n\n", i + 1, hit.content));
        }
    }

    let citations = fused
        .iter()
        .take(MAX_CITATIONS)
        .map(|hit| Citation {
            chunk_id: hit.chunk_id.clone(),
            document_id: hit.document_id.clone(),
            document_name: hit.metadata.filename.clone(),
            page_number: hit.metadata.start_page,
            excerpt: truncate_chars(&hit.content, CITATION_EXCERPT_CHARS),
            score: hit.score,
        })
        .collect();

    RetrievedContext { context, citations }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
