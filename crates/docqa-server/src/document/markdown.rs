//! Markdown and plain-text parsing via an AST walk.
//!
//! Markdown is parsed to events and re-emitted as structure-preserving
//! text: heading markers survive (the chunker keys off them), paragraphs
//! end with a blank line, soft/hard breaks become newlines. TXT uses the
//! same pipeline in its lax form.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use crate::utils::error::AppError;

use super::parser::ParsedDocument;

pub fn parse(data: &[u8]) -> Result<ParsedDocument, AppError> {
    let (text, _, _) = encoding_rs::UTF_8.decode(data);

    if text.trim().is_empty() {
        return Err(AppError::DocumentProcess(
            "no text content in document".to_string(),
        ));
    }

    let mut out = String::with_capacity(text.len());

    for event in Parser::new(&text) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                for _ in 0..level as usize {
                    out.push('#');
                }
                out.push(' ');
            }
            Event::End(TagEnd::Heading(_)) => out.push('\n'),
            Event::Start(Tag::Item) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("- ");
            }
            Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph) => out.push_str("\n\n"),
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::CodeBlock) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push('\n');
            }
            Event::Rule => out.push('\n'),
            _ => {}
        }
    }

    Ok(ParsedDocument {
        content: out,
        page_count: None,
        page_offsets: None,
    })
}
