//! Configuration for the page tree graph.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{PageTreeError, Result};
use crate::persistence::SaveFormat;
use crate::retry::RetryPolicy;
use crate::splitter::SplitStrategy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://api.openai.com")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Model name (e.g., "gpt-4", "claude-3-opus")
    pub model: String,

    /// Maximum tokens for response (optional)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation (optional)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    400
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    OpenAi,
    /// Deterministic local hashing, no network.
    Hash,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Fixed vector size for this deployment.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            api_base: String::new(),
            api_key: String::new(),
            model: default_embedding_model(),
            dimension: default_dimension(),
        }
    }
}

/// Tree construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum pages per leaf.
    pub max_chunk_size: usize,
    pub strategy: SplitStrategy,
    /// Maximum in-flight capability calls per document.
    pub concurrency: usize,
    /// Attempts per node before degrading.
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt.
    pub base_delay_ms: u64,
    /// Overall per-document deadline.
    pub deadline_secs: Option<u64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 10,
            strategy: SplitStrategy::default(),
            concurrency: 4,
            max_attempts: 3,
            base_delay_ms: 500,
            deadline_secs: None,
        }
    }
}

impl IngestConfig {
    /// Reject settings that would make ingestion meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size < 1 {
            return Err(PageTreeError::InvalidConfiguration(
                "max_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.concurrency < 1 {
            return Err(PageTreeError::InvalidConfiguration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_attempts < 1 {
            return Err(PageTreeError::InvalidConfiguration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if let SplitStrategy::Fixed { fanout } = self.strategy {
            if fanout < 2 {
                return Err(PageTreeError::InvalidConfiguration(
                    "fixed split fanout must be at least 2".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Where the file-backed graph lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub format: SaveFormat,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            format: SaveFormat::Json,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM settings
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    embedding: Option<EmbeddingConfig>,
    ingest: Option<IngestConfig>,
    store: Option<StoreConfig>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_*, EMBEDDING_*, PAGE_TREE_*)
    /// 2. Config file (~/.config/page-tree/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }
        if let Ok(api_key) = env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(tokens) = parse_env("LLM_MAX_TOKENS")? {
            self.llm.max_tokens = tokens;
        }
        if let Some(temp) = parse_env("LLM_TEMPERATURE")? {
            self.llm.temperature = temp;
        }

        if let Ok(provider) = env::var("EMBEDDING_PROVIDER") {
            self.embedding.provider = match provider.to_lowercase().as_str() {
                "openai" => EmbeddingProvider::OpenAi,
                "hash" => EmbeddingProvider::Hash,
                other => {
                    return Err(PageTreeError::Config(format!(
                        "Unknown EMBEDDING_PROVIDER '{other}' (expected openai or hash)"
                    )));
                }
            };
        }
        if let Ok(api_base) = env::var("EMBEDDING_API_BASE") {
            self.embedding.api_base = api_base;
        }
        if let Ok(api_key) = env::var("EMBEDDING_API_KEY") {
            self.embedding.api_key = api_key;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dimension) = parse_env("EMBEDDING_DIMENSION")? {
            self.embedding.dimension = dimension;
        }

        if let Some(size) = parse_env("PAGE_TREE_MAX_CHUNK_SIZE")? {
            self.ingest.max_chunk_size = size;
        }
        if let Some(concurrency) = parse_env("PAGE_TREE_CONCURRENCY")? {
            self.ingest.concurrency = concurrency;
        }
        if let Ok(dir) = env::var("PAGE_TREE_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PageTreeError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| PageTreeError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
        }
        if let Some(embedding) = file_config.embedding {
            config.embedding = embedding;
        }
        if let Some(ingest) = file_config.ingest {
            config.ingest = ingest;
        }
        if let Some(store) = file_config.store {
            config.store = store;
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "page-tree")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that the LLM settings needed for summarization are present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(PageTreeError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_key.is_empty() {
            return Err(PageTreeError::Config(
                "LLM API key is required. Set LLM_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(PageTreeError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        self.validate_embedding()?;
        self.ingest.validate()
    }

    /// Validate only the embedding section (search needs no LLM).
    pub fn validate_embedding(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(PageTreeError::InvalidConfiguration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi && self.embedding.api_key.is_empty()
        {
            return Err(PageTreeError::Config(
                "Embedding API key is required for the openai provider. Set EMBEDDING_API_KEY."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    parse_value(key, env::var(key).ok())
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            PageTreeError::Config(format!("Invalid value for {key}: '{value}'"))
        }),
    }
}
