pub mod filter;
mod flat;
mod hnsw;
pub mod metric;
mod persistence;

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chunking::Chunk;
use crate::config::ConfigError;
use crate::{RagError, Result};
use flat::{FlatIndex, exact_search};
use hnsw::HnswGraph;
use metric::{Query, Scored};

pub use filter::{MetadataFilter, Predicate};
pub use metric::DistanceMetric;

/// Which nearest-neighbor structure answers unfiltered searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackendKind {
    #[default]
    Hnsw,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: DistanceMetric,
    pub backend: IndexBackendKind,
    /// Fixed vector length; when unset it is taken from the first insert
    pub dimension: Option<usize>,
    /// Graph degree per layer (the bottom layer keeps twice as many links)
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Searches whose filter matches at most this many live chunks are answered by an
    /// exact scan
    pub exact_search_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            backend: IndexBackendKind::Hnsw,
            dimension: None,
            m: 16,
            ef_construction: 200,
            ef_search: 128,
            exact_search_threshold: 512,
        }
    }
}

impl IndexConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(2..=256).contains(&self.m) {
            return Err(ConfigError::InvalidGraphDegree(self.m));
        }
        if self.ef_construction < self.m {
            return Err(ConfigError::InvalidConstructionBreadth {
                ef_construction: self.ef_construction,
                m: self.m,
            });
        }
        if self.ef_search == 0 {
            return Err(ConfigError::InvalidSearchBreadth(self.ef_search));
        }
        if self.dimension == Some(0) {
            return Err(ConfigError::InvalidIndexDimension(0));
        }
        Ok(())
    }
}

/// A stored vector. Deleted entries keep their vector so the graph can still route
/// through them until the next compaction.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub vector: Vec<f32>,
    pub norm: f32,
    pub record: Option<Record>,
}

#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub chunk: Chunk,
    pub indexed_at: DateTime<Utc>,
}

/// Nearest-neighbor structure over the slot array.
pub(crate) trait NeighborSearch: Send + Sync + Debug {
    fn insert(&mut self, slot: usize, slots: &[Slot]);

    /// Up to `k` accepted slots, best first.
    fn search(
        &self,
        query: &Query<'_>,
        k: usize,
        slots: &[Slot],
        accept: &dyn Fn(usize) -> bool,
    ) -> Vec<Scored>;

    fn clear(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub count: usize,
    pub dimensionality: Option<usize>,
    pub metric: DistanceMetric,
    pub backend: IndexBackendKind,
    pub documents: usize,
    /// Deleted entries still held by the graph
    pub deleted: usize,
}

#[derive(Debug)]
struct IndexState {
    dimension: Option<usize>,
    slots: Vec<Slot>,
    by_id: HashMap<String, usize>,
    by_document: HashMap<String, Vec<usize>>,
    live: usize,
    backend: Box<dyn NeighborSearch>,
}

impl IndexState {
    fn new(config: &IndexConfig) -> Self {
        Self {
            dimension: config.dimension,
            slots: Vec::new(),
            by_id: HashMap::new(),
            by_document: HashMap::new(),
            live: 0,
            backend: new_backend(config),
        }
    }

    /// Check a whole batch before anything is written.
    fn validate(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<Option<usize>> {
        if chunks.len() != vectors.len() {
            return Err(RagError::LengthMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        check_pairs(self.dimension, chunks.iter().zip(vectors))
    }

    fn insert(&mut self, chunk: Chunk, vector: Vec<f32>, indexed_at: DateTime<Utc>) {
        if let Some(&existing) = self.by_id.get(&chunk.id) {
            self.tombstone(existing);
        }

        let slot = self.slots.len();
        self.by_id.insert(chunk.id.clone(), slot);
        self.by_document
            .entry(chunk.document_id.clone())
            .or_default()
            .push(slot);
        self.slots.push(Slot {
            norm: metric::norm(&vector),
            vector,
            record: Some(Record { chunk, indexed_at }),
        });
        self.live += 1;
        self.backend.insert(slot, &self.slots);
    }

    fn tombstone(&mut self, slot: usize) -> bool {
        let Some(record) = self.slots.get_mut(slot).and_then(|s| s.record.take()) else {
            return false;
        };
        let chunk = record.chunk;
        if self.by_id.get(&chunk.id) == Some(&slot) {
            self.by_id.remove(&chunk.id);
        }
        if let Some(slots) = self.by_document.get_mut(&chunk.document_id) {
            slots.retain(|&s| s != slot);
            if slots.is_empty() {
                self.by_document.remove(&chunk.document_id);
            }
        }
        self.live -= 1;
        true
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        let slots = self.by_document.get(document_id).cloned().unwrap_or_default();
        slots
            .into_iter()
            .filter(|&slot| self.tombstone(slot))
            .count()
    }

    fn deleted(&self) -> usize {
        self.slots.len() - self.live
    }

    /// Rebuild from live records once tombstones outnumber them.
    fn compact_if_needed(&mut self, config: &IndexConfig) {
        let deleted = self.deleted();
        if deleted == 0 || deleted * 2 <= self.slots.len() {
            return;
        }

        debug!("Compacting index: {} live, {} deleted", self.live, deleted);
        let old = std::mem::take(&mut self.slots);
        let dimension = self.dimension;
        *self = Self::new(config);
        self.dimension = dimension;
        for slot in old {
            if let Some(record) = slot.record {
                self.insert(record.chunk, slot.vector, record.indexed_at);
            }
        }
    }

    fn records(&self) -> impl Iterator<Item = (usize, &Slot, &Record)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.record.as_ref().map(|record| (idx, slot, record)))
    }

    fn page(&self, filter: Option<&MetadataFilter>, offset: usize, limit: usize) -> Vec<Chunk> {
        self.records()
            .filter(|(_, _, record)| filter.is_none_or(|f| f.matches(&record.chunk)))
            .skip(offset)
            .take(limit)
            .map(|(_, _, record)| record.chunk.clone())
            .collect()
    }

    fn accepts(&self, slot: usize, filter: Option<&MetadataFilter>) -> bool {
        self.slots
            .get(slot)
            .and_then(|s| s.record.as_ref())
            .is_some_and(|record| filter.is_none_or(|f| f.matches(&record.chunk)))
    }

    fn hit(&self, scored: Scored) -> Option<SearchHit> {
        let record = self.slots.get(scored.slot)?.record.as_ref()?;
        Some(SearchHit {
            chunk: record.chunk.clone(),
            score: scored.score,
        })
    }
}

/// The dimension every vector must share, taken from `dimension` or the first vector.
fn check_pairs<'a>(
    dimension: Option<usize>,
    mut pairs: impl Iterator<Item = (&'a Chunk, &'a Vec<f32>)>,
) -> Result<Option<usize>> {
    let Some((first_chunk, first_vector)) = pairs.next() else {
        return Ok(dimension);
    };
    let expected = dimension.unwrap_or(first_vector.len());
    if expected == 0 {
        return Err(RagError::InvalidInput("Vectors must not be empty".to_string()));
    }

    for (chunk, vector) in std::iter::once((first_chunk, first_vector)).chain(pairs) {
        if vector.len() != expected {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::InvalidInput(format!(
                "Vector for chunk '{}' contains non-finite values",
                chunk.id
            )));
        }
        if chunk.id.is_empty() {
            return Err(RagError::InvalidInput("Chunk id must not be empty".to_string()));
        }
    }
    Ok(Some(expected))
}

fn new_backend(config: &IndexConfig) -> Box<dyn NeighborSearch> {
    match config.backend {
        IndexBackendKind::Hnsw => Box::new(HnswGraph::new(
            config.metric,
            config.m,
            config.ef_construction,
            config.ef_search,
        )),
        IndexBackendKind::Flat => Box::new(FlatIndex),
    }
}

/// In-memory vector index keyed by chunk id.
///
/// Writers take an exclusive lock for the whole batch, so readers always see either none
/// or all of an insert. Results are ordered by descending score, ties by insertion order.
#[derive(Debug)]
pub struct VectorIndex {
    config: IndexConfig,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    #[inline]
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: RwLock::new(IndexState::new(&config)),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    /// Insert chunks with their vectors. A chunk whose id is already present replaces
    /// the stored one. Nothing is written if any pair is rejected.
    #[inline]
    pub fn add(&self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<usize> {
        let mut state = self.state.write();
        let dimension = state.validate(&chunks, &vectors)?;
        state.dimension = dimension;

        let added = chunks.len();
        let now = Utc::now();
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            state.insert(chunk, vector, now);
        }
        state.compact_if_needed(&self.config);
        debug!("Added {} chunks to index ({} live)", added, state.live);
        Ok(added)
    }

    /// Swap every chunk of `document_id` for the given ones under a single lock.
    ///
    /// Returns how many old chunks were removed. On error the previous version stays.
    #[inline]
    pub fn replace_document(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize> {
        if let Some(stray) = chunks.iter().find(|c| c.document_id != document_id) {
            return Err(RagError::InvalidInput(format!(
                "Chunk '{}' belongs to document '{}', not '{}'",
                stray.id, stray.document_id, document_id
            )));
        }

        let mut state = self.state.write();
        let dimension = state.validate(&chunks, &vectors)?;
        state.dimension = dimension;

        let removed = state.remove_document(document_id);
        let now = Utc::now();
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            state.insert(chunk, vector, now);
        }
        state.compact_if_needed(&self.config);
        info!(
            "Replaced document {}: removed {} chunks, {} live",
            document_id, removed, state.live
        );
        Ok(removed)
    }

    /// Top-`k` chunks for `query`, restricted to chunks matching `filter`.
    #[inline]
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let state = self.state.read();
        if k == 0 || state.live == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = state.dimension {
            if query.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let filter = filter.filter(|f| !f.is_empty());
        let query = Query::new(self.config.metric, query);
        let accept = |slot: usize| state.accepts(slot, filter);

        let matching = match filter {
            Some(filter) => state
                .records()
                .filter(|(_, _, record)| filter.matches(&record.chunk))
                .count(),
            None => state.live,
        };
        if matching == 0 {
            return Ok(Vec::new());
        }

        let wanted = k.min(matching);
        let mut scored = Vec::new();
        if matching > self.config.exact_search_threshold {
            scored = state.backend.search(&query, k, &state.slots, &accept);
        }
        if scored.len() < wanted {
            scored = exact_search(&query, k, &state.slots, &accept);
        }

        Ok(scored
            .into_iter()
            .filter_map(|scored| state.hit(scored))
            .collect())
    }

    /// Chunks matching `filter` in insertion order, without any ranking.
    #[inline]
    pub fn search_by_metadata(&self, filter: &MetadataFilter, limit: usize) -> Vec<Chunk> {
        self.state.read().page(Some(filter), 0, limit)
    }

    /// One page of stored chunks in insertion order.
    #[inline]
    pub fn list_chunks(&self, offset: usize, limit: usize) -> Vec<Chunk> {
        self.state.read().page(None, offset, limit)
    }

    /// Remove every chunk matching `filter` under a single lock, returning how many were
    /// removed. An empty filter is rejected rather than treated as "everything".
    #[inline]
    pub fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<usize> {
        if filter.is_empty() {
            return Err(RagError::InvalidInput(
                "Refusing to delete with an empty metadata filter".to_string(),
            ));
        }

        let mut state = self.state.write();
        let matching: Vec<usize> = state
            .records()
            .filter(|(_, _, record)| filter.matches(&record.chunk))
            .map(|(slot, _, _)| slot)
            .collect();
        let removed = matching
            .into_iter()
            .filter(|&slot| state.tombstone(slot))
            .count();
        if removed > 0 {
            state.compact_if_needed(&self.config);
            info!("Deleted {} chunks matching {:?}", removed, filter.predicates());
        }
        Ok(removed)
    }

    /// Remove every chunk of a document, returning how many were removed.
    #[inline]
    pub fn delete(&self, document_id: &str) -> usize {
        let mut state = self.state.write();
        let removed = state.remove_document(document_id);
        if removed > 0 {
            state.compact_if_needed(&self.config);
            info!("Deleted {} chunks of document {}", removed, document_id);
        }
        removed
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<Chunk> {
        let state = self.state.read();
        let slot = *state.by_id.get(id)?;
        state
            .slots
            .get(slot)?
            .record
            .as_ref()
            .map(|record| record.chunk.clone())
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().by_id.contains_key(id)
    }

    /// Ids of documents with at least one chunk, sorted.
    #[inline]
    pub fn document_ids(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state.by_document.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.state.read().live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. A dimension learned from inserts is forgotten.
    #[inline]
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = IndexState::new(&self.config);
        info!("Cleared vector index");
    }

    #[inline]
    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            count: state.live,
            dimensionality: state.dimension,
            metric: self.config.metric,
            backend: self.config.backend,
            documents: state.by_document.len(),
            deleted: state.deleted(),
        }
    }

    /// Write a snapshot of all live entries to `path`.
    #[inline]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = {
            let state = self.state.read();
            persistence::IndexSnapshot::new(
                self.config.clone(),
                state.dimension,
                state
                    .records()
                    .map(|(_, slot, record)| persistence::SnapshotRecord {
                        chunk: record.chunk.clone(),
                        vector: slot.vector.clone(),
                        indexed_at: record.indexed_at,
                    })
                    .collect(),
            )
        };
        let count = snapshot.records.len();
        persistence::write_snapshot(path, &snapshot)?;
        info!("Saved {} index entries to {}", count, path.display());
        Ok(())
    }

    /// Rebuild an index from a snapshot written by [`VectorIndex::save`].
    #[inline]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let snapshot = persistence::read_snapshot(path)?;
        let index = Self::new(snapshot.config)?;
        {
            let mut state = index.state.write();
            state.dimension = check_pairs(
                snapshot.dimension.or(state.dimension),
                snapshot.records.iter().map(|r| (&r.chunk, &r.vector)),
            )
            .map_err(|e| {
                RagError::Persistence(format!("Corrupt snapshot {}: {e}", path.display()))
            })?;
            for record in snapshot.records {
                state.insert(record.chunk, record.vector, record.indexed_at);
            }
            info!("Loaded {} index entries from {}", state.live, path.display());
        }
        Ok(index)
    }
}
