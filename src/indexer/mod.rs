//! Turns extracted documents into indexed chunks: chunk, embed, then swap the document's
//! previous version out of the index in one step.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use futures::{StreamExt, stream};
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::chunking::{Chunk, ChunkIdAllocator, ChunkStrategy, Chunker, Metadata, SectionsRange};
use crate::config::Config;
use crate::embeddings::{CachedEmbedder, EmbeddingCache, EmbeddingProvider, OllamaEmbedder};
use crate::extraction::{ExtractedDocument, Table};
use crate::index::VectorIndex;
use crate::{RagError, Result};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// What indexing one document produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexingReport {
    pub document_id: String,
    pub text_chunks: usize,
    pub table_chunks: usize,
    pub key_value_chunks: usize,
    /// Chunks of an earlier version that were removed
    pub replaced_chunks: usize,
}

impl IndexingReport {
    #[inline]
    pub fn chunks_indexed(&self) -> usize {
        self.text_chunks + self.table_chunks + self.key_value_chunks
    }
}

#[derive(Debug)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub result: Result<IndexingReport>,
}

/// Statistics about a batch of documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub documents_indexed: usize,
    pub documents_failed: usize,
    pub chunks_created: usize,
    pub chunks_replaced: usize,
}

/// Per-document results of [`DocumentIndexer::index_documents`], in input order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl BatchReport {
    #[inline]
    pub fn stats(&self) -> IndexingStats {
        self.outcomes
            .iter()
            .fold(IndexingStats::default(), |mut stats, outcome| {
                match &outcome.result {
                    Ok(report) => {
                        stats.documents_indexed += 1;
                        stats.chunks_created += report.chunks_indexed();
                        stats.chunks_replaced += report.replaced_chunks;
                    }
                    Err(_) => stats.documents_failed += 1,
                }
                stats
            })
    }

    #[inline]
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RagError)> {
        self.outcomes.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|e| (outcome.document_id.as_str(), e))
        })
    }
}

/// Chunker, embedder and index wired together.
pub struct DocumentIndexer {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    concurrency: usize,
}

impl DocumentIndexer {
    #[inline]
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Build the Ollama-backed pipeline described by `config`, with its embedding cache.
    #[inline]
    pub fn from_config(config: &Config, index: Arc<VectorIndex>) -> Result<Self> {
        config.validate()?;

        let chunker = Chunker::new(config.chunking.clone())?;
        let ollama = OllamaEmbedder::new(&config.embedding)?;
        let cache = Arc::new(EmbeddingCache::from_config(&config.cache));
        let embedder = CachedEmbedder::new(Arc::new(ollama), cache)
            .with_batch_size(config.embedding.batch_size as usize)
            .with_concurrency(config.cache.concurrency);

        Ok(Self::new(chunker, Arc::new(embedder), index)
            .with_concurrency(config.cache.concurrency))
    }

    /// Documents processed at once by [`DocumentIndexer::index_documents`]
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    #[inline]
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Every chunk a document yields: running text first, then one chunk per table, then
    /// one chunk for all key/value pairs.
    #[inline]
    pub fn prepare_chunks(&self, document: &ExtractedDocument) -> Vec<Chunk> {
        let document_id = document.document_id.as_str();
        let mut base = document.metadata.to_metadata();
        base.insert("language".to_string(), document.language().into());

        let mut chunks = self.chunker.chunk(
            document_id,
            &document.content,
            &with_type(&base, "text"),
        );
        let mut ids = ChunkIdAllocator::after(document_id, &chunks);

        for table in document.tables() {
            let content = table.to_text();
            let metadata = table_metadata(&base, table);
            let element = format!("table {}", table.table_id);
            let pieces = self.element_chunks(&mut ids, document_id, &content, &metadata, &element);
            chunks.extend(pieces);
        }

        let pairs: Vec<(&str, &str)> = document.key_values().collect();
        if !pairs.is_empty() {
            let content = pairs
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .join("\n");
            let mut metadata = with_type(&base, "key_value");
            metadata.insert("pair_count".to_string(), pairs.len().into());
            let pieces =
                self.element_chunks(&mut ids, document_id, &content, &metadata, "key_value_pairs");
            chunks.extend(pieces);
        }

        for (sequence_index, chunk) in chunks.iter_mut().enumerate() {
            chunk.sequence_index = sequence_index;
        }
        chunks
    }

    /// A structured element as one chunk, or re-chunked when it alone exceeds the budget.
    fn element_chunks(
        &self,
        ids: &mut ChunkIdAllocator,
        document_id: &str,
        content: &str,
        metadata: &Metadata,
        element: &str,
    ) -> Vec<Chunk> {
        let content = content.trim();
        if content.is_empty() {
            return Vec::new();
        }

        let token_count = self.chunker.counter().count(content);
        let mut pieces = if token_count <= self.chunker.config().max_tokens {
            vec![Chunk {
                id: String::new(),
                document_id: document_id.to_string(),
                sequence_index: 0,
                content: content.to_string(),
                token_count,
                sections_range: SectionsRange::Whole,
                strategy: ChunkStrategy::None,
                overlap_len: 0,
                metadata: metadata.clone(),
            }]
        } else {
            debug!(
                "Element '{}' of {} has {} tokens, splitting",
                element, document_id, token_count
            );
            self.chunker.chunk(document_id, content, metadata)
        };

        for piece in &mut pieces {
            piece.id = ids.next_id(&piece.content);
            piece.sections_range = SectionsRange::Element(element.to_string());
        }
        pieces
    }

    /// Index one document, replacing any earlier version of it.
    ///
    /// Embedding happens before the index is touched, so a failure leaves the previous
    /// version searchable.
    #[inline]
    pub async fn index_document(&self, document: &ExtractedDocument) -> Result<IndexingReport> {
        let document_id = document.document_id.as_str();
        if document_id.trim().is_empty() {
            return Err(RagError::InvalidInput(
                "Document id must not be empty".to_string(),
            ));
        }

        let chunks = self.prepare_chunks(document);
        let mut report = IndexingReport {
            document_id: document_id.to_string(),
            text_chunks: 0,
            table_chunks: 0,
            key_value_chunks: 0,
            replaced_chunks: 0,
        };
        for chunk in &chunks {
            match chunk.metadata.get("chunk_type").and_then(|v| v.as_str()) {
                Some("table") => report.table_chunks += 1,
                Some("key_value") => report.key_value_chunks += 1,
                _ => report.text_chunks += 1,
            }
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        debug!("Embedding {} chunks of {}", texts.len(), document_id);
        let vectors = self.embedder.embed(&texts).await?;

        report.replaced_chunks = self
            .index
            .replace_document(document_id, chunks, vectors)?;
        info!(
            "Indexed document {}: {} chunks ({} replaced)",
            document_id,
            report.chunks_indexed(),
            report.replaced_chunks
        );
        Ok(report)
    }

    /// Index many documents, a few at a time. One failing document does not stop the
    /// others.
    #[inline]
    pub async fn index_documents(&self, documents: &[ExtractedDocument]) -> BatchReport {
        info!(
            "Indexing {} documents with concurrency {}",
            documents.len(),
            self.concurrency
        );

        let outcomes: Vec<DocumentOutcome> = stream::iter(documents)
            .map(|document| async move {
                let result = self.index_document(document).await;
                if let Err(e) = &result {
                    error!("Failed to index document {}: {}", document.document_id, e);
                }
                DocumentOutcome {
                    document_id: document.document_id.clone(),
                    result,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = BatchReport { outcomes };
        let stats = report.stats();
        info!(
            "Indexing finished: {} documents indexed, {} failed, {} chunks",
            stats.documents_indexed, stats.documents_failed, stats.chunks_created
        );
        report
    }

    /// Remove a document's chunks, returning how many were removed.
    #[inline]
    pub fn remove_document(&self, document_id: &str) -> usize {
        self.index.delete(document_id)
    }

    #[inline]
    pub fn indexed_documents(&self) -> Vec<String> {
        self.index.document_ids()
    }
}

fn with_type(base: &Metadata, chunk_type: &str) -> Metadata {
    let mut metadata = base.clone();
    metadata.insert("chunk_type".to_string(), chunk_type.into());
    metadata
}

fn table_metadata(base: &Metadata, table: &Table) -> Metadata {
    let mut metadata = with_type(base, "table");
    metadata.insert("table_id".to_string(), table.table_id.as_str().into());
    metadata.insert("row_count".to_string(), table.row_count.into());
    metadata.insert("column_count".to_string(), table.column_count.into());
    metadata
}
