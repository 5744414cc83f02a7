pub mod settings;

pub use settings::{
    ApiType, ChunkingSettings, ContextConfig, DocumentConfig, EmbeddingConfig, LlmConfig,
    LlmModelConfig, MilvusConfig, RagConfig, RetryConfig, ServerConfig, Settings, VectorConfig,
};
