#[cfg(test)]
mod tests;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::RagError;
use crate::config::ConfigError;
use crate::http::RetryingAgent;

pub const DEFAULT_RERANK_BATCH_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Rerank by default when a request does not say otherwise
    pub enabled: bool,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Candidates sent per rerank request
    pub batch_size: usize,
    pub timeout_ms: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            batch_size: DEFAULT_RERANK_BATCH_SIZE,
            timeout_ms: 30_000,
        }
    }
}

impl RerankConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        self.reranker_url()?;
        if !(1..=256).contains(&self.batch_size) {
            return Err(ConfigError::InvalidRerankBatchSize(self.batch_size));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(self.timeout_ms));
        }
        Ok(())
    }

    #[inline]
    pub fn reranker_url(&self) -> std::result::Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

/// Scores (query, text) pairs. Higher is more relevant.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// One score per text, in the order given.
    async fn rerank(&self, query: &str, texts: &[String]) -> crate::Result<Vec<f32>>;

    /// Most texts to send in a single call
    fn batch_size(&self) -> usize {
        DEFAULT_RERANK_BATCH_SIZE
    }
}

/// Cross-encoder served over HTTP with a text-embeddings-inference style `/rerank`
/// endpoint.
#[derive(Debug, Clone)]
pub struct HttpReranker {
    base_url: Url,
    batch_size: usize,
    http: RetryingAgent,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RankedText {
    index: usize,
    score: f32,
}

impl HttpReranker {
    #[inline]
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let base_url = config
            .reranker_url()
            .context("Failed to generate reranker URL from config")?;

        Ok(Self {
            base_url,
            batch_size: config.batch_size.max(1),
            http: RetryingAgent::new(Duration::from_millis(config.timeout_ms.max(1))),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.http.set_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.http.set_backoff(backoff);
        self
    }

    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/health")
            .context("Failed to build health URL")?;
        self.http
            .get_text(&url)
            .context("Reranker health check failed")?;
        info!("Health check passed for reranker at {}", self.base_url);
        Ok(())
    }

    /// Score `texts` on the calling thread in a single request
    #[inline]
    pub fn rerank_blocking(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self
            .base_url
            .join("/rerank")
            .context("Failed to build rerank URL")?;
        let request_json = serde_json::to_string(&RerankRequest { query, texts })
            .context("Failed to serialize rerank request")?;

        debug!("Reranking {} texts", texts.len());
        let response_text = self
            .http
            .post_json(&url, &request_json)
            .context("Failed to rerank texts")?;
        let ranked: Vec<RankedText> =
            serde_json::from_str(&response_text).context("Failed to parse rerank response")?;

        let mut scores = vec![None; texts.len()];
        for item in ranked {
            let slot = scores.get_mut(item.index).with_context(|| {
                format!(
                    "Reranker returned index {} for {} texts",
                    item.index,
                    texts.len()
                )
            })?;
            *slot = Some(item.score);
        }

        scores
            .into_iter()
            .enumerate()
            .map(|(idx, score)| {
                score.with_context(|| format!("Reranker returned no score for text {idx}"))
            })
            .collect()
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, texts: &[String]) -> crate::Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.clone();
        let query = query.to_string();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.rerank_blocking(&query, &texts))
            .await
            .map_err(|e| RagError::Rerank(format!("Rerank task failed: {e}")))?
            .map_err(|e| RagError::Rerank(format!("{e:#}")))
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}
