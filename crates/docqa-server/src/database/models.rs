use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Md,
    Markdown,
    Txt,
}

impl DocumentType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "md" => Some(Self::Md),
            "markdown" => Some(Self::Markdown),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Md => "md",
            Self::Markdown => "markdown",
            Self::Txt => "txt",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub doc_type: DocumentType,
    pub size_bytes: u64,
    pub storage_path: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    /// Canonical post-parse text, present once parsing succeeded.
    pub full_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(filename: String, doc_type: DocumentType, size_bytes: u64, storage_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename,
            doc_type,
            size_bytes,
            storage_path,
            status: DocumentStatus::Uploading,
            chunk_count: 0,
            full_text: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    /// The chunk's own section title, if any.
    pub heading: Option<String>,
    /// Slash-joined ancestor headings, e.g. "1. Basics > 1.2 Volume".
    pub hierarchy: String,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    pub token_count: usize,
    /// Optional LLM-generated locator sentence prepended before indexing.
    pub context_prefix: Option<String>,
    pub vector_id: String,
}

impl DocumentChunk {
    /// Text used for embedding and BM25 indexing; display uses `content`.
    pub fn enriched_content(&self) -> String {
        match &self.context_prefix {
            Some(prefix) => format!("{}\n{}", prefix, self.content),
            None => self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: String,
    /// Comma-joined document ids; may be empty.
    pub document_ids: Vec<String>,
    pub summary: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(document_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_ids,
            summary: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub token_count: usize,
    /// Serialised citation list for assistant turns.
    pub citations: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessageRecord {
    pub fn new(session_id: &str, role: MessageRole, content: String, citations: Option<String>) -> Self {
        let token_count = crate::utils::token_estimator::estimate_tokens(&content);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content,
            token_count,
            citations,
            created_at: Utc::now(),
        }
    }
}
