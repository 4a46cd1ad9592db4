
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkConfig;
use crate::embeddings::cache::CacheConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::index::IndexConfig;
use crate::retrieval::RetrievalConfig;
use crate::retrieval::rerank::RerankConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reranking: RerankConfig,
    #[serde(default)]
    pub embedding: OllamaConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max tokens: {0} (must be greater than 0)")]
    InvalidMaxTokens(usize),
    #[error("min_tokens ({min}) must be less than max_tokens ({max})")]
    MinNotBelowMax { min: usize, max: usize },
    #[error("target_tokens ({target}) must be between min_tokens ({min}) and max_tokens ({max})")]
    TargetOutOfRange {
        target: usize,
        min: usize,
        max: usize,
    },
    #[error("overlap_tokens ({overlap}) must be less than target_tokens ({target})")]
    OverlapTooLarge { overlap: usize, target: usize },
    #[error("Invalid avg_chars_per_token: {0} (must be a positive number)")]
    InvalidCharsPerToken(f64),
    #[error("Invalid graph degree m: {0} (must be between 2 and 256)")]
    InvalidGraphDegree(usize),
    #[error("Invalid ef_construction: {ef_construction} (must be at least m = {m})")]
    InvalidConstructionBreadth { ef_construction: usize, m: usize },
    #[error("Invalid ef_search: {0} (must be greater than 0)")]
    InvalidSearchBreadth(usize),
    #[error("Invalid index dimension: {0} (must be greater than 0)")]
    InvalidIndexDimension(usize),
    #[error("Index dimension ({index}) does not match embedding dimension ({embedding})")]
    DimensionConflict { index: usize, embedding: usize },
    #[error("Invalid result count k: {0} (must be greater than 0)")]
    InvalidTopK(usize),
    #[error("Invalid rerank candidate pool: {0} (must be between 1 and 1000)")]
    InvalidCandidatePool(usize),
    #[error("Invalid rerank batch size: {0} (must be between 1 and 256)")]
    InvalidRerankBatchSize(usize),
    #[error("Invalid timeout: {0}ms (must be greater than 0)")]
    InvalidTimeout(u64),
    #[error("Invalid concurrency: {0} (must be between 1 and 64)")]
    InvalidConcurrency(usize),
    #[error("Invalid cache capacity: {0} (must be greater than 0)")]
    InvalidCacheCapacity(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Directory holding `config.toml` and the persisted index
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        self.index.validate()?;
        self.retrieval.validate()?;
        self.reranking.validate()?;
        self.embedding.validate()?;
        self.cache.validate()?;

        if let Some(dimension) = self.index.dimension {
            let embedding = self.embedding.embedding_dimension as usize;
            if dimension != embedding {
                return Err(ConfigError::DimensionConflict {
                    index: dimension,
                    embedding,
                });
            }
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Where the vector index snapshot is saved
    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.get_base_dir().join("index.json")
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=8192).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(1..=8192).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}
