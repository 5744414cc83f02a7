//! Per-document BM25 inverted tables with length normalisation.
//!
//! Tokenisation lowercases, treats every CJK codepoint as its own token
//! and groups runs of letters/digits; everything else delimits. Constants
//! K1 = 1.2, b = 0.75.

use dashmap::DashMap;
use std::collections::HashMap;

use super::vector_store::ChunkMetadata;

const K1: f32 = 1.2;
const B: f32 = 0.75;

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FA5}')
}

pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

struct IndexedChunk {
    content: String,
    metadata: ChunkMetadata,
    term_freq: HashMap<String, u32>,
    length: usize,
}

struct DocIndex {
    /// Insertion order preserved for deterministic tie-breaks.
    chunks: Vec<(String, IndexedChunk)>,
    avg_length: f32,
}

/// Input row for indexing: (chunk id, indexable text, metadata). The
/// indexable text is the enriched content when a context prefix exists.
pub type Bm25Row = (String, String, ChunkMetadata);

#[derive(Default)]
pub struct Bm25Index {
    docs: DashMap<String, DocIndex>,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)index a document. The per-document table and its average length
    /// are swapped in atomically.
    pub fn index_document(&self, document_id: &str, rows: Vec<Bm25Row>) {
        let mut chunks = Vec::with_capacity(rows.len());
        let mut total_length = 0usize;

        for (chunk_id, text, metadata) in rows {
            let tokens = tokenize(&text);
            let length = tokens.len();
            total_length += length;

            let mut term_freq: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *term_freq.entry(token).or_insert(0) += 1;
            }

            chunks.push((
                chunk_id,
                IndexedChunk {
                    content: text,
                    metadata,
                    term_freq,
                    length,
                },
            ));
        }

        let avg_length = if chunks.is_empty() {
            0.0
        } else {
            total_length as f32 / chunks.len() as f32
        };

        self.docs
            .insert(document_id.to_string(), DocIndex { chunks, avg_length });
    }

    pub fn remove_document(&self, document_id: &str) {
        self.docs.remove(document_id);
    }

    pub fn chunk_count(&self, document_id: &str) -> usize {
        self.docs.get(document_id).map(|d| d.chunks.len()).unwrap_or(0)
    }

    /// Rank one document's chunks against the query. Zero-scoring chunks
    /// are discarded.
    pub fn search(&self, document_id: &str, query: &str, top_k: usize) -> Vec<Bm25Hit> {
        let Some(doc) = self.docs.get(document_id) else {
            return Vec::new();
        };

        let query_terms = tokenize(query);
        if query_terms.is_empty() || doc.chunks.is_empty() {
            return Vec::new();
        }

        let n = doc.chunks.len() as f32;

        // document frequency per distinct query term
        let mut df: HashMap<&str, f32> = HashMap::new();
        for term in &query_terms {
            if df.contains_key(term.as_str()) {
                continue;
            }
            let count = doc
                .chunks
                .iter()
                .filter(|(_, c)| c.term_freq.contains_key(term))
                .count() as f32;
            df.insert(term.as_str(), count);
        }

        let mut hits: Vec<Bm25Hit> = Vec::new();
        for (chunk_id, chunk) in &doc.chunks {
            let mut score = 0.0f32;
            for term in &query_terms {
                let Some(tf) = chunk.term_freq.get(term) else {
                    continue;
                };
                let tf = *tf as f32;
                let df = df.get(term.as_str()).copied().unwrap_or(0.0);
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let norm = 1.0 - B + B * chunk.length as f32 / doc.avg_length.max(f32::EPSILON);
                score += idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
            }

            if score > 0.0 {
                hits.push(Bm25Hit {
                    chunk_id: chunk_id.clone(),
                    document_id: document_id.to_string(),
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                    score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }

    /// Multi-document search: per-document top max(topK, 5), merged,
    /// deduped by chunk id, re-sorted, truncated.
    pub fn search_many(&self, document_ids: &[String], query: &str, top_k: usize) -> Vec<Bm25Hit> {
        let per_doc = top_k.max(5);

        let mut merged: Vec<Bm25Hit> = Vec::new();
        for document_id in document_ids {
            for hit in self.search(document_id, query, per_doc) {
                if !merged.iter().any(|h| h.chunk_id == hit.chunk_id) {
                    merged.push(hit);
                }
            }
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(top_k);
        merged
    }
}
