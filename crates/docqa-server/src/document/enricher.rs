//! Contextual enrichment: a one-sentence locator prefix per chunk.
//!
//! The prompt embeds a truncated view of the whole document (head 2/3 +
//! tail 1/3 of a 6,000-char window) plus the chunk body. Individual
//! failures only leave the prefix empty; enrichment is never fatal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::database::models::DocumentChunk;
use crate::llm::{ChatRequest, LlmRouter};

const DOCUMENT_WINDOW_CHARS: usize = 6000;
const PACING_DELAY_MS: u64 = 100;
const PREFIX_MAX_TOKENS: usize = 100;
const PREFIX_TEMPERATURE: f32 = 0.2;

pub struct ContextualEnricher {
    router: Arc<LlmRouter>,
}

impl ContextualEnricher {
    pub fn new(router: Arc<LlmRouter>) -> Self {
        Self { router }
    }

    /// Fill `context_prefix` on each chunk. A 100 ms pause between chunks
    /// keeps providers below their rate limits.
    pub async fn enrich(&self, full_text: &str, chunks: &mut [DocumentChunk]) {
        let window = truncate_window(full_text, DOCUMENT_WINDOW_CHARS);
        let client = self.router.primary();

        for (i, chunk) in chunks.iter_mut().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(PACING_DELAY_MS)).await;
            }

            let request = ChatRequest::single(
                locator_prompt(&window, &chunk.content),
                PREFIX_MAX_TOKENS,
                PREFIX_TEMPERATURE,
            );

            match client.chat(&request).await {
                Ok(reply) => {
                    let prefix = reply.trim();
                    if prefix.is_empty() {
                        debug!("empty locator for chunk {}", chunk.id);
                    } else {
                        chunk.context_prefix = Some(prefix.to_string());
                    }
                }
                Err(e) => {
                    warn!("locator generation failed for chunk {}: {}", chunk.id, e);
                }
            }
        }
    }
}

fn locator_prompt(document: &str, chunk: &str) -> String {
    format!(
        "<document>\n{}\n</document>\n\n<chunk>\n{}\n</chunk>\n\n\
         请用一句话（不超过50字）说明该片段在文档中的位置和主题，便于检索定位。\
         直接输出这句话，不要任何解释。",
        document, chunk
    )
}

/// Head 2/3 + tail 1/3 of the window with an ellipsis marker, when the
/// document exceeds it.
fn truncate_window(text: &str, window: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window {
        return text.to_string();
    }

    let head_len = window * 2 / 3;
    let tail_len = window - head_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    format!("{}\n……\n{}", head, tail)
}
