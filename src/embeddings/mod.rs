//! Text-to-vector providers and the content-hash embedding cache.

pub mod cache;
pub mod ollama;

use async_trait::async_trait;

use crate::{RagError, Result};

pub use cache::{CacheConfig, CacheStats, CachedEmbedder, EmbeddingCache};
pub use ollama::OllamaEmbedder;

/// A black-box embedding model: text in, fixed-length vector out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input text (in order).
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(RagError::Embedding(format!(
                "expected 1 embedding, provider returned {}",
                vectors.len()
            )));
        }
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("provider returned no embedding".to_string()))
    }

    /// The dimensionality of the output vectors, when known up front.
    fn dimension(&self) -> Option<usize> {
        None
    }
}
