use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::{
    ChatMessageRecord, ChatSession, Document, DocumentChunk, DocumentStatus, DocumentType,
    MessageRole,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDto {
    pub id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentDto {
    pub fn from_document(doc: Document, include_text: bool) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename,
            doc_type: doc.doc_type,
            size_bytes: doc.size_bytes,
            status: doc.status,
            chunk_count: doc.chunk_count,
            full_text: if include_text { doc.full_text } else { None },
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDto {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub heading: Option<String>,
    pub hierarchy: String,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    pub token_count: usize,
    pub context_prefix: Option<String>,
}

impl From<DocumentChunk> for ChunkDto {
    fn from(chunk: DocumentChunk) -> Self {
        Self {
            id: chunk.id,
            document_id: chunk.document_id,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            heading: chunk.heading,
            hierarchy: chunk.hierarchy,
            start_page: chunk.start_page,
            end_page: chunk.end_page,
            token_count: chunk.token_count,
            context_prefix: chunk.context_prefix,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentDto {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub id: String,
    pub document_ids: Vec<String>,
    pub summary: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChatSession> for SessionDto {
    fn from(session: ChatSession) -> Self {
        Self {
            id: session.id,
            document_ids: session.document_ids,
            summary: session.summary,
            message_count: session.message_count,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub token_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessageRecord> for MessageDto {
    fn from(message: ChatMessageRecord) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            token_count: message.token_count,
            citations: message.citations,
            created_at: message.created_at,
        }
    }
}

/// A grounded source reference attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: String,
    pub page_number: Option<u32>,
    pub excerpt: String,
    pub score: f32,
}

/// One frame of a chat reply stream. The terminal frame carries empty
/// content and `complete: true`; delta frames carry non-empty content.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChunk {
    pub content: String,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ChatChunk {
    pub fn delta(content: String) -> Self {
        Self {
            content,
            complete: false,
            citations: None,
            error: None,
            warning: None,
        }
    }

    pub fn warning(message: String) -> Self {
        Self {
            content: String::new(),
            complete: false,
            citations: None,
            error: None,
            warning: Some(message),
        }
    }

    pub fn complete(citations: Vec<Citation>) -> Self {
        Self {
            content: String::new(),
            complete: true,
            citations: Some(citations),
            error: None,
            warning: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            content: String::new(),
            complete: true,
            citations: None,
            error: Some(message),
            warning: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    pub query: String,
    pub session_id: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    pub query: String,
    pub session_id: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    #[serde(default)]
    pub skip_enrichment: bool,
}
