use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::models::{ChatMessageRecord, ChatSession, Document, DocumentChunk, DocumentStatus};

/// Transactional metadata store the core consumes. Documents own their
/// chunks; sessions own their messages. Implementations provide atomic
/// per-row writes.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_document(&self, document: Document) -> Result<()>;
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;
    async fn list_documents(&self) -> Result<Vec<Document>>;
    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> Result<()>;
    /// Terminal success transition: stores the canonical text and chunk count.
    async fn mark_document_ready(&self, id: &str, full_text: String, chunk_count: usize) -> Result<()>;
    async fn delete_document(&self, id: &str) -> Result<()>;

    async fn insert_chunks(&self, document_id: &str, chunks: Vec<DocumentChunk>) -> Result<()>;
    /// Chunks ordered by `chunk_index`.
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;
    async fn chunk_count(&self, document_id: &str) -> Result<usize>;
    async fn distinct_hierarchies(&self, document_id: &str) -> Result<Vec<String>>;
    async fn delete_chunks(&self, document_id: &str) -> Result<()>;

    async fn insert_session(&self, session: ChatSession) -> Result<()>;
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>>;
    async fn update_session(&self, session: ChatSession) -> Result<()>;
    /// Atomically bump the session's message counter; returns the new
    /// count.
    async fn increment_message_count(&self, session_id: &str) -> Result<usize>;
    /// Fold a compaction into the session row: append the summary text
    /// and subtract the removed messages from the counter.
    async fn apply_compaction(&self, session_id: &str, summary: &str, removed: usize) -> Result<()>;

    async fn insert_message(&self, message: ChatMessageRecord) -> Result<()>;
    /// Messages ordered ascending by creation.
    async fn get_messages(&self, session_id: &str) -> Result<Vec<ChatMessageRecord>>;
    async fn delete_messages(&self, session_id: &str, message_ids: &[String]) -> Result<()>;
}

/// In-memory default backed by concurrent maps. Vector and BM25 indices are
/// secondary views of the chunk rows stored here.
#[derive(Default)]
pub struct MemoryRepository {
    documents: DashMap<String, Document>,
    chunks: DashMap<String, Vec<DocumentChunk>>,
    sessions: DashMap<String, ChatSession>,
    messages: DashMap<String, Vec<ChatMessageRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_document(&self, document: Document) -> Result<()> {
        self.documents.insert(document.id.clone(), document);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.get(id).map(|d| d.clone()))
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.documents.iter().map(|d| d.clone()).collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(docs)
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        match self.documents.get_mut(id) {
            Some(mut doc) => {
                doc.status = status;
                doc.updated_at = Utc::now();
                Ok(())
            }
            None => anyhow::bail!("document {} not found", id),
        }
    }

    async fn mark_document_ready(&self, id: &str, full_text: String, chunk_count: usize) -> Result<()> {
        match self.documents.get_mut(id) {
            Some(mut doc) => {
                doc.status = DocumentStatus::Ready;
                doc.full_text = Some(full_text);
                doc.chunk_count = chunk_count;
                doc.updated_at = Utc::now();
                Ok(())
            }
            None => anyhow::bail!("document {} not found", id),
        }
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.documents.remove(id);
        Ok(())
    }

    async fn insert_chunks(&self, document_id: &str, mut new_chunks: Vec<DocumentChunk>) -> Result<()> {
        new_chunks.sort_by_key(|c| c.chunk_index);
        self.chunks.insert(document_id.to_string(), new_chunks);
        Ok(())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        Ok(self
            .chunks
            .get(document_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize> {
        Ok(self.chunks.get(document_id).map(|c| c.len()).unwrap_or(0))
    }

    async fn distinct_hierarchies(&self, document_id: &str) -> Result<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        if let Some(chunks) = self.chunks.get(document_id) {
            for chunk in chunks.iter() {
                if !chunk.hierarchy.is_empty() && !out.contains(&chunk.hierarchy) {
                    out.push(chunk.hierarchy.clone());
                }
            }
        }
        Ok(out)
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<()> {
        self.chunks.remove(document_id);
        Ok(())
    }

    async fn insert_session(&self, session: ChatSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        Ok(self.sessions.get(id).map(|s| s.clone()))
    }

    async fn update_session(&self, session: ChatSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn increment_message_count(&self, session_id: &str) -> Result<usize> {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.message_count += 1;
                session.updated_at = Utc::now();
                Ok(session.message_count)
            }
            None => anyhow::bail!("session {} not found", session_id),
        }
    }

    async fn apply_compaction(&self, session_id: &str, summary: &str, removed: usize) -> Result<()> {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.summary = match session.summary.take().filter(|s| !s.is_empty()) {
                    Some(existing) => Some(format!("{}\n{}", existing, summary)),
                    None => Some(summary.to_string()),
                };
                session.message_count = session.message_count.saturating_sub(removed);
                session.updated_at = Utc::now();
                Ok(())
            }
            None => anyhow::bail!("session {} not found", session_id),
        }
    }

    async fn insert_message(&self, message: ChatMessageRecord) -> Result<()> {
        self.messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<ChatMessageRecord>> {
        Ok(self
            .messages
            .get(session_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn delete_messages(&self, session_id: &str, message_ids: &[String]) -> Result<()> {
        if let Some(mut messages) = self.messages.get_mut(session_id) {
            messages.retain(|m| !message_ids.contains(&m.id));
        }
        Ok(())
    }
}
