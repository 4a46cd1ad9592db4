#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::EmbeddingProvider;
use crate::config::ConfigError;
use crate::{RagError, Result};

const DEFAULT_BATCH_SIZE: usize = 32;

/// SHA-256 of the embedded text
pub type ContentHash = [u8; 32];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached vectors
    pub capacity: usize,
    /// Embedding batches allowed in flight at once
    pub concurrency: usize,
}

impl Default for CacheConfig {
    #[inline]
    fn default() -> Self {
        Self {
            capacity: 1000,
            concurrency: 4,
        }
    }
}

impl CacheConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity(self.capacity));
        }
        if !(1..=64).contains(&self.concurrency) {
            return Err(ConfigError::InvalidConcurrency(self.concurrency));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded LRU cache from text content hash to embedding vector.
///
/// The lock is held only for a single lookup or insert.
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: Mutex<LruCache<ContentHash, Vec<f32>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity)
    }

    #[inline]
    pub fn key(text: &str) -> ContentHash {
        Sha256::digest(text.as_bytes()).into()
    }

    /// Look up a cached embedding by text, counting the hit or miss.
    #[inline]
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(text);
        let found = self.entries.lock().get(&key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    #[inline]
    pub fn insert(&self, text: &str, embedding: Vec<f32>) {
        let key = Self::key(text);
        self.entries.lock().put(key, embedding);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Wraps a provider with an [`EmbeddingCache`].
///
/// Cache misses are de-duplicated within a call, split into batches and sent to the
/// provider with bounded concurrency. Two concurrent calls may both embed the same new
/// text; the later insert wins.
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    batch_size: usize,
    concurrency: usize,
}

impl CachedEmbedder {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            provider,
            cache,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: CacheConfig::default().concurrency,
        }
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[inline]
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> =
            texts.iter().map(|text| self.cache.get(text)).collect();

        let mut pending: Vec<String> = Vec::new();
        let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, (text, cached)) in texts.iter().zip(&vectors).enumerate() {
            if cached.is_some() {
                continue;
            }
            positions
                .entry(text.as_str())
                .or_insert_with(|| {
                    pending.push(text.clone());
                    Vec::new()
                })
                .push(idx);
        }

        if !pending.is_empty() {
            debug!(
                "Embedding {} uncached texts ({} requested) in batches of {}",
                pending.len(),
                texts.len(),
                self.batch_size
            );

            let batches: Vec<Vec<Vec<f32>>> = stream::iter(pending.chunks(self.batch_size).map(<[String]>::to_vec))
                .map(|batch| async move {
                    let embedded = self.provider.embed(&batch).await?;
                    if embedded.len() != batch.len() {
                        return Err(RagError::Embedding(format!(
                            "provider returned {} embeddings for {} texts",
                            embedded.len(),
                            batch.len()
                        )));
                    }
                    Ok(embedded)
                })
                .buffered(self.concurrency)
                .try_collect()
                .await?;

            for (text, vector) in pending.iter().zip(batches.into_iter().flatten()) {
                if let Some(slots) = positions.get(text.as_str()) {
                    for &idx in slots {
                        if let Some(slot) = vectors.get_mut(idx) {
                            *slot = Some(vector.clone());
                        }
                    }
                }
                self.cache.insert(text, vector);
            }
        }

        vectors
            .into_iter()
            .map(|vector| {
                vector.ok_or_else(|| RagError::Embedding("missing embedding for text".to_string()))
            })
            .collect()
    }

    fn dimension(&self) -> Option<usize> {
        self.provider.dimension()
    }
}
