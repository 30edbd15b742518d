/// Configuration system for repo-mentor
///
/// Supports loading from multiple sources with priority:
/// Environment variables > Config file > Defaults
use crate::error::RagError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// LLM provider configuration (embeddings + chat)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Ingestion pipeline configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local object store
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API base URL (OpenAI-compatible)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Chat model used for commit summarization
    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Chat model used for answering queries
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum retries for rate-limited or failed requests
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Concurrent chunk-text generation tasks per ingestion run
    #[serde(default = "default_chunk_workers")]
    pub chunk_workers: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of results when the caller does not specify top_k
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

// Default value functions
fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repo-mentor")
        .join("store")
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_summary_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_chunk_workers() -> usize {
    10
}

fn default_top_k() -> usize {
    5
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            summary_model: default_summary_model(),
            chat_model: default_chat_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_workers: default_chunk_workers(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, RagError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagError::other(format!("Failed to read config file: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| RagError::other(format!("Failed to parse config file: {}", e)))?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("REPO_MENTOR_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }

        if let Ok(url) = std::env::var("REPO_MENTOR_BASE_URL") {
            self.llm.base_url = url;
        }

        if let Ok(model) = std::env::var("REPO_MENTOR_EMBEDDING_MODEL") {
            self.llm.embedding_model = model;
        }

        if let Ok(model) = std::env::var("REPO_MENTOR_CHAT_MODEL") {
            self.llm.chat_model = model;
        }

        if let Ok(workers) = std::env::var("REPO_MENTOR_CHUNK_WORKERS") {
            if let Ok(n) = workers.parse::<usize>() {
                if n > 0 {
                    self.ingest.chunk_workers = n;
                }
            }
        }

        if let Ok(timeout) = std::env::var("REPO_MENTOR_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.llm.timeout_secs = secs;
            }
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ingest.chunk_workers, 10);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.llm.embedding_model, "text-embedding-3-small");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [storage]
            root = "/tmp/store"

            [llm]
            embedding_model = "custom-model"

            [ingest]
            chunk_workers = 4
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/tmp/store"));
        assert_eq!(config.llm.embedding_model, "custom-model");
        assert_eq!(config.ingest.chunk_workers, 4);
        // Unspecified sections keep defaults
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.retrieval.default_top_k, 5);
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            config.ingest.chunk_workers,
            deserialized.ingest.chunk_workers
        );
        assert_eq!(config.llm.chat_model, deserialized.llm.chat_model);
    }
}
