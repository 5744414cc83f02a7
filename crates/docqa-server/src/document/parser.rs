use crate::database::models::DocumentType;
use crate::utils::error::AppError;

use super::{markdown, pdf};

/// Canonical text produced by a parser, suitable for both display and
/// chunking.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub page_count: Option<usize>,
    /// Byte offset of each page start within `content` (PDF only).
    pub page_offsets: Option<Vec<usize>>,
}

impl ParsedDocument {
    /// Map a byte offset in `content` back to a 1-based page number.
    pub fn page_for_offset(&self, offset: usize) -> Option<u32> {
        let offsets = self.page_offsets.as_ref()?;
        if offsets.is_empty() {
            return None;
        }
        let page = match offsets.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i.max(1),
        };
        Some(page as u32)
    }
}

pub struct DocumentParser;

impl DocumentParser {
    /// Extract canonical text from a raw upload.
    pub fn parse(data: &[u8], doc_type: DocumentType) -> Result<ParsedDocument, AppError> {
        match doc_type {
            DocumentType::Pdf => pdf::parse(data),
            DocumentType::Md | DocumentType::Markdown | DocumentType::Txt => {
                markdown::parse(data)
            }
        }
    }
}
