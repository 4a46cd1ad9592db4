pub mod evaluation;
pub mod rerank;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunking::Metadata;
use crate::config::ConfigError;
use crate::embeddings::EmbeddingProvider;
use crate::index::{MetadataFilter, SearchHit, VectorIndex};
use crate::{RagError, Result};
use rerank::Reranker;

pub use evaluation::{EvaluationSummary, JudgedQuery, QueryEvaluation, RetrievalEvaluator};
pub use rerank::{HttpReranker, RerankConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned when a request does not name `k`
    pub default_k: usize,
    /// Dense candidates fetched for reranking; the pool is never smaller than `k`
    pub rerank_candidate_pool: usize,
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 8,
            rerank_candidate_pool: 50,
            timeout_ms: 30_000,
        }
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.default_k == 0 {
            return Err(ConfigError::InvalidTopK(self.default_k));
        }
        if !(1..=1000).contains(&self.rerank_candidate_pool) {
            return Err(ConfigError::InvalidCandidatePool(self.rerank_candidate_pool));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(self.timeout_ms));
        }
        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub metadata_filter: Option<MetadataFilter>,
    /// `None` defers to the retriever's default
    #[serde(default)]
    pub enable_rerank: Option<bool>,
}

impl RetrievalRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            k: None,
            metadata_filter: None,
            enable_rerank: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.metadata_filter = Some(filter);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rerank(mut self, enable: bool) -> Self {
        self.enable_rerank = Some(enable);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Dense,
    Reranked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
    /// 1-based
    pub rank: usize,
    pub retrieval_method: RetrievalMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub results: Vec<RetrievalResult>,
    /// Dense candidates considered before truncation
    pub total_candidates: usize,
    pub retrieval_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_time_ms: Option<u64>,
    pub reranked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub total_queries: u64,
    pub rerank_operations: u64,
    pub rerank_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queries: AtomicU64,
    reranks: AtomicU64,
    rerank_failures: AtomicU64,
}

/// Answers queries against a [`VectorIndex`]: embed, dense search, optional rerank.
///
/// The read path never mutates the index; only the statistics counters change.
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    rerank_by_default: bool,
    config: RetrievalConfig,
    counters: Counters,
}

impl Retriever {
    #[inline]
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            index,
            embedder,
            reranker: None,
            rerank_by_default: false,
            config,
            counters: Counters::default(),
        })
    }

    #[inline]
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Whether requests that leave `enable_rerank` unset are reranked
    #[inline]
    #[must_use]
    pub fn rerank_by_default(mut self, enabled: bool) -> Self {
        self.rerank_by_default = enabled;
        self
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[inline]
    pub fn stats(&self) -> RetrievalStats {
        RetrievalStats {
            total_queries: self.counters.queries.load(Ordering::Relaxed),
            rerank_operations: self.counters.reranks.load(Ordering::Relaxed),
            rerank_failures: self.counters.rerank_failures.load(Ordering::Relaxed),
        }
    }

    /// Run a query under the configured timeout.
    #[inline]
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResponse> {
        self.retrieve_with_timeout(request, self.config.timeout())
            .await
    }

    #[inline]
    pub async fn retrieve_with_timeout(
        &self,
        request: &RetrievalRequest,
        timeout: Duration,
    ) -> Result<RetrievalResponse> {
        tokio::time::timeout(timeout, self.run(request))
            .await
            .map_err(|_| {
                warn!("Retrieval timed out after {:?}", timeout);
                RagError::Timeout(timeout)
            })?
    }

    /// Like [`Retriever::retrieve`], but gives up as soon as `cancel` fires.
    #[inline]
    pub async fn retrieve_cancellable(
        &self,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Retrieval cancelled");
                Err(RagError::Cancelled)
            }
            response = self.retrieve(request) => response,
        }
    }

    async fn run(&self, request: &RetrievalRequest) -> Result<RetrievalResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("Query must not be empty".to_string()));
        }
        let k = request.k.unwrap_or(self.config.default_k);
        if k == 0 {
            return Err(RagError::InvalidInput("k must be greater than 0".to_string()));
        }

        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let reranker = self
            .reranker
            .as_ref()
            .filter(|_| request.enable_rerank.unwrap_or(self.rerank_by_default));
        let pool = if reranker.is_some() {
            k.max(self.config.rerank_candidate_pool)
        } else {
            k
        };

        let vector = self.embedder.embed_one(query).await?;
        let mut hits = self
            .index
            .search(&vector, pool, request.metadata_filter.as_ref())?;
        let total_candidates = hits.len();
        debug!("Dense search returned {} candidates for k={}", total_candidates, k);

        let mut method = RetrievalMethod::Dense;
        let mut rerank_time_ms = None;
        if let Some(reranker) = reranker.filter(|_| !hits.is_empty()) {
            let rerank_started = Instant::now();
            match self.rerank(reranker.as_ref(), query, &hits).await {
                Ok(scores) => {
                    apply_scores(&mut hits, &scores);
                    method = RetrievalMethod::Reranked;
                    self.counters.reranks.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Reranking failed, keeping dense ranking: {}", e);
                    self.counters.rerank_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
            rerank_time_ms = Some(elapsed_ms(rerank_started));
        }

        hits.truncate(k);
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .enumerate()
            .map(|(idx, hit)| RetrievalResult {
                id: hit.chunk.id,
                document_id: hit.chunk.document_id,
                content: hit.chunk.content,
                metadata: hit.chunk.metadata,
                score: hit.score,
                rank: idx + 1,
                retrieval_method: method,
            })
            .collect();

        let response = RetrievalResponse {
            query: request.query.clone(),
            total_candidates,
            retrieval_time_ms: elapsed_ms(started),
            rerank_time_ms,
            reranked: method == RetrievalMethod::Reranked,
            results,
        };
        info!(
            "Retrieved {} results ({} candidates) in {}ms",
            response.results.len(),
            response.total_candidates,
            response.retrieval_time_ms
        );
        Ok(response)
    }

    /// Scores for every hit, in hit order, requested `batch_size` at a time.
    async fn rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        hits: &[SearchHit],
    ) -> Result<Vec<f32>> {
        let texts: Vec<String> = hits.iter().map(|hit| hit.chunk.content.clone()).collect();
        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(reranker.batch_size().max(1)) {
            let batch_scores = reranker.rerank(query, batch).await?;
            if batch_scores.len() != batch.len() {
                return Err(RagError::Rerank(format!(
                    "Reranker returned {} scores for {} texts",
                    batch_scores.len(),
                    batch.len()
                )));
            }
            scores.extend(batch_scores);
        }
        Ok(scores)
    }
}

/// Replace dense scores and re-sort. The sort is stable, so equal scores keep the dense
/// order.
fn apply_scores(hits: &mut [SearchHit], scores: &[f32]) {
    for (hit, score) in hits.iter_mut().zip(scores) {
        hit.score = *score;
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
