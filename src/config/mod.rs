
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkingConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

/// Top-level configuration for the pipeline, loaded from a TOML file owned
/// by the embedding application.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
}

/// Connection settings for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub dimension: u32,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn url(&self) -> Result<Url, ConfigError> {
        let raw = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl(raw))
    }
}

/// Primary text-generation provider plus an optional fallback that is only
/// consulted when the primary is unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
}

/// A single chat-completions provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Short provider name used in logs and error detail.
    pub name: String,
    /// Base URL of an OpenAI-compatible API.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    #[inline]
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            endpoint: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

impl ProviderConfig {
    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.endpoint).map_err(|_| ConfigError::InvalidUrl(self.endpoint.clone()))
    }
}

/// Tuning knobs for the retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Influence of cosine similarity in hybrid fusion.
    pub vector_weight: f32,
    /// Influence of lexical match in hybrid fusion.
    pub text_weight: f32,
    /// Similarity floor admitting vector candidates into hybrid scoring even
    /// when they miss the lexical predicate.
    pub vector_floor: f32,
    pub default_top_k: usize,
    pub default_threshold: f32,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            text_weight: 0.3,
            vector_floor: 0.5,
            default_top_k: 5,
            default_threshold: 0.7,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid provider name: (cannot be empty)")]
    InvalidProviderName,
    #[error("Invalid target chunk size: {0} (must be between 16 and 4096)")]
    InvalidTargetChunkSize(usize),
    #[error("Overlap size ({0}) must be strictly less than target chunk size ({1})")]
    InvalidOverlapSize(usize, usize),
    #[error("Minimum chunk size ({0}) must be less than target chunk size ({1})")]
    InvalidMinChunkSize(usize, usize),
    #[error("Invalid fusion weight {name}: {value} (must be non-negative)")]
    InvalidWeight { name: &'static str, value: f32 },
    #[error("Fusion weights must not both be zero")]
    ZeroWeights,
    #[error("Invalid vector floor: {0} (must be between 0 and 1)")]
    InvalidVectorFloor(f32),
    #[error("Invalid similarity threshold: {0} (must be between 0 and 1)")]
    InvalidThreshold(f32),
    #[error("Invalid top_k: must be greater than zero")]
    InvalidTopK,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path.as_ref(), content).with_context(|| {
            format!("Failed to write config file: {}", path.as_ref().display())
        })?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.protocol != "http" && self.embedding.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.embedding.protocol.clone()));
        }
        if self.embedding.batch_size == 0 || self.embedding.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }
        if self.embedding.dimension < 64 || self.embedding.dimension > 4096 {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimension,
            ));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding.model.clone()));
        }
        self.embedding.url()?;

        self.validate_provider(&self.llm.primary)?;
        if let Some(fallback) = &self.llm.fallback {
            self.validate_provider(fallback)?;
        }

        if self.chunking.target_tokens < 16 || self.chunking.target_tokens > 4096 {
            return Err(ConfigError::InvalidTargetChunkSize(
                self.chunking.target_tokens,
            ));
        }
        if self.chunking.overlap_tokens >= self.chunking.target_tokens {
            return Err(ConfigError::InvalidOverlapSize(
                self.chunking.overlap_tokens,
                self.chunking.target_tokens,
            ));
        }
        if self.chunking.min_chunk_tokens >= self.chunking.target_tokens {
            return Err(ConfigError::InvalidMinChunkSize(
                self.chunking.min_chunk_tokens,
                self.chunking.target_tokens,
            ));
        }

        let retrieval = &self.retrieval;
        if retrieval.vector_weight < 0.0 {
            return Err(ConfigError::InvalidWeight {
                name: "vector_weight",
                value: retrieval.vector_weight,
            });
        }
        if retrieval.text_weight < 0.0 {
            return Err(ConfigError::InvalidWeight {
                name: "text_weight",
                value: retrieval.text_weight,
            });
        }
        if retrieval.vector_weight == 0.0 && retrieval.text_weight == 0.0 {
            return Err(ConfigError::ZeroWeights);
        }
        if !(0.0..=1.0).contains(&retrieval.vector_floor) {
            return Err(ConfigError::InvalidVectorFloor(retrieval.vector_floor));
        }
        if !(0.0..=1.0).contains(&retrieval.default_threshold) {
            return Err(ConfigError::InvalidThreshold(retrieval.default_threshold));
        }
        if retrieval.default_top_k == 0 {
            return Err(ConfigError::InvalidTopK);
        }

        Ok(())
    }

    fn validate_provider(&self, provider: &ProviderConfig) -> Result<(), ConfigError> {
        if provider.name.trim().is_empty() {
            return Err(ConfigError::InvalidProviderName);
        }
        if provider.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(provider.model.clone()));
        }
        provider.endpoint_url()?;
        Ok(())
    }
}
