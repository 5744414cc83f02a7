//! Vector store contract and the in-memory cosine implementation.
//!
//! The memory store scans linearly over a concurrent map, which is fine
//! for the O(10^4) chunks a single deployment carries; the Milvus backend
//! satisfies the same contract for larger corpora.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::similarity::cosine_similarity;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub filename: String,
    pub chunk_index: usize,
    pub heading: Option<String>,
    pub hierarchy: String,
    pub start_page: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Equals the chunk id.
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Search filter. `document_ids` is membership (a single id is a
/// one-element set); `hierarchy_prefix` matches records whose hierarchy
/// starts with it.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub document_ids: Option<Vec<String>>,
    pub hierarchy_prefix: Option<String>,
}

impl SearchFilter {
    pub fn for_document(id: &str) -> Self {
        Self {
            document_ids: Some(vec![id.to_string()]),
            hierarchy_prefix: None,
        }
    }

    pub fn for_documents(ids: &[String]) -> Self {
        Self {
            document_ids: Some(ids.to_vec()),
            hierarchy_prefix: None,
        }
    }

    pub fn with_hierarchy(mut self, prefix: Option<String>) -> Self {
        self.hierarchy_prefix = prefix;
        self
    }

    fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(ids) = &self.document_ids {
            if !ids.iter().any(|id| *id == record.document_id) {
                return false;
            }
        }
        if let Some(prefix) = &self.hierarchy_prefix {
            if !record.metadata.hierarchy.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Registry key, e.g. "memory" or "milvus".
    fn kind(&self) -> &str;

    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Descending cosine score, insertion order on ties.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>>;

    async fn delete_by_document(&self, document_id: &str) -> Result<()>;

    async fn count_by_document(&self, document_id: &str) -> Result<usize>;
}

struct StoredRecord {
    record: VectorRecord,
    seq: u64,
}

pub struct MemoryVectorStore {
    dimension: usize,
    records: DashMap<String, StoredRecord>,
    next_seq: AtomicU64,
}

impl MemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()> {
        for record in records {
            if record.embedding.len() != self.dimension {
                anyhow::bail!(
                    "embedding dimension mismatch for {}: expected {}, got {}",
                    record.id,
                    self.dimension,
                    record.embedding.len()
                );
            }
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            self.records
                .insert(record.id.clone(), StoredRecord { record, seq });
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            anyhow::bail!(
                "query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            );
        }

        let mut scored: Vec<(VectorHit, u64)> = Vec::new();
        for entry in self.records.iter() {
            let stored = entry.value();
            if !filter.matches(&stored.record) {
                continue;
            }
            let score = cosine_similarity(query, &stored.record.embedding)?;
            scored.push((
                VectorHit {
                    id: stored.record.id.clone(),
                    document_id: stored.record.document_id.clone(),
                    content: stored.record.content.clone(),
                    metadata: stored.record.metadata.clone(),
                    score,
                },
                stored.seq,
            ));
        }

        scored.sort_by(|a, b| {
            b.0.score
                .partial_cmp(&a.0.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(hit, _)| hit).collect())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        self.records
            .retain(|_, stored| stored.record.document_id != document_id);
        Ok(())
    }

    async fn count_by_document(&self, document_id: &str) -> Result<usize> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().record.document_id == document_id)
            .count())
    }
}
