use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub document: DocumentConfig,
    pub chunking: ChunkingSettings,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub context: ContextConfig,
    pub rag: RagConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DocumentConfig {
    pub storage_path: String,
    pub max_file_size: u64,
    /// CSV of accepted extensions.
    pub allowed_types: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            storage_path: "./data/uploads".to_string(),
            max_file_size: 20 * 1024 * 1024,
            allowed_types: "pdf,md,markdown,txt".to_string(),
        }
    }
}

impl DocumentConfig {
    pub fn allowed_list(&self) -> Vec<String> {
        self.allowed_types
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            min_chunk_size: 50,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct VectorConfig {
    /// "memory" or "milvus".
    #[serde(rename = "type")]
    pub kind: String,
    pub milvus: MilvusConfig,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            milvus: MilvusConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MilvusConfig {
    pub host: String,
    pub port: u16,
    pub collection: String,
    pub dimension: usize,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 19530,
            collection: "docqa_chunks".to_string(),
            dimension: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "mock", "openai", "azure" or "dashscope".
    #[serde(rename = "type")]
    pub kind: String,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub api_version: Option<String>,
    pub dimension: usize,
    /// Per-request input cap for batch embedding.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: "mock".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_version: None,
            dimension: 1024,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Chat,
    Responses,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmModelConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub api_type: ApiType,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub api_version: Option<String>,
    pub timeout_ms: u64,
    pub max_tokens: usize,
    pub enabled: bool,
}

impl Default for LlmModelConfig {
    fn default() -> Self {
        Self {
            kind: "openai".to_string(),
            api_type: ApiType::Chat,
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_version: None,
            timeout_ms: 60_000,
            max_tokens: 2048,
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub primary: LlmModelConfig,
    pub fallback: LlmModelConfig,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: LlmModelConfig::default(),
            fallback: LlmModelConfig {
                enabled: false,
                ..LlmModelConfig::default()
            },
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub max_history_rounds: usize,
    pub max_context_tokens: usize,
    pub summary_threshold: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history_rounds: 5,
            max_context_tokens: 4000,
            summary_threshold: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub contextual_retrieval_enabled: bool,
    pub small_document_threshold: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.3,
            contextual_retrieval_enabled: false,
            small_document_threshold: 10,
        }
    }
}

impl Settings {
    /// Optional `config/settings.toml` overlaid with `APP__`-prefixed env
    /// vars; defaults cover everything else.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
