//! PDF extraction with heading and list recognition.
//!
//! Produces Markdown-flavoured text: recognised headings become `##`/`###`
//! lines, bullets become `- ` items, bare page-number lines are dropped.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::error::AppError;

use super::parser::ParsedDocument;

static PAGE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?\s*\d+\s*-?$").expect("page number regex")
});

// 1.2 / 1.2.3 style sub-headings; checked before the level-1 pattern so
// "1.2 Volume" is not swallowed by the "1. ..." alternative.
static HEADING_L2_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+\.\d+\.?\s+.+|\d+\.\d+\.\d+\.?\s+.+)$").expect("level-2 heading regex")
});

static HEADING_L1_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d+\.\s+.+|第[一二三四五六七八九十百]+[章节条款]\s*.+|[一二三四五六七八九十]+[、.]\s*.+)$",
    )
    .expect("level-1 heading regex")
});

pub fn parse(data: &[u8]) -> Result<ParsedDocument, AppError> {
    let doc = lopdf::Document::load_mem(data)
        .map_err(|e| AppError::DocumentProcess(format!("unreadable PDF: {}", e)))?;

    let pages = doc.get_pages();
    let page_count = pages.len();

    let mut content = String::new();
    let mut page_offsets = Vec::with_capacity(page_count);

    for page_num in pages.keys() {
        page_offsets.push(content.len());

        let raw = doc
            .extract_text(&[*page_num])
            .map_err(|e| AppError::DocumentProcess(format!("page {}: {}", page_num, e)))?;

        content.push_str(&restructure(&raw));
        if !content.ends_with('\n') {
            content.push('\n');
        }
    }

    if content.trim().is_empty() {
        return Err(AppError::DocumentProcess(
            "no text content in PDF".to_string(),
        ));
    }

    Ok(ParsedDocument {
        content,
        page_count: Some(page_count),
        page_offsets: Some(page_offsets),
    })
}

/// Apply the line-level structure rules to one page of extracted text.
fn restructure(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + raw.len() / 8);

    for line in raw.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            out.push('\n');
            continue;
        }
        if PAGE_NUMBER_RE.is_match(trimmed) {
            continue;
        }

        if HEADING_L2_RE.is_match(trimmed) {
            out.push_str("\n### ");
            out.push_str(trimmed);
            out.push_str("\n\n");
        } else if HEADING_L1_RE.is_match(trimmed) {
            out.push_str("\n## ");
            out.push_str(trimmed);
            out.push_str("\n\n");
        } else if let Some(rest) = strip_bullet(trimmed) {
            out.push_str("- ");
            out.push_str(rest.trim_start());
            out.push('\n');
        } else {
            out.push_str(trimmed);
            out.push('\n');
        }
    }

    out
}

fn strip_bullet(line: &str) -> Option<&str> {
    let mut chars = line.char_indices();
    let (_, first) = chars.next()?;
    if matches!(first, '●' | '•' | '-' | '○') {
        Some(&line[first.len_utf8()..])
    } else {
        None
    }
}
