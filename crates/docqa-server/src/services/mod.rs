pub mod chat;
pub mod context_manager;
pub mod ingest;
pub mod retrieval;

pub use chat::{ChatAsk, ChatOrchestrator};
pub use context_manager::ContextManager;
pub use ingest::IngestService;
pub use retrieval::{RetrievalEngine, RetrievedContext};
