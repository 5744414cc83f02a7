pub mod chunker;
pub mod enricher;
pub mod markdown;
pub mod parser;
pub mod pdf;

pub use chunker::{ChunkDraft, ChunkingConfig, HierarchicalChunker};
pub use enricher::ContextualEnricher;
pub use parser::{DocumentParser, ParsedDocument};
