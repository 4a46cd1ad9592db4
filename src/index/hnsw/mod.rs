#[cfg(test)]
mod tests;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use super::metric::{DistanceMetric, Query, Scored};
use super::{NeighborSearch, Slot};

const MAX_LEVEL: usize = 16;
const LEVEL_SEED: u64 = 0x5eed_1dea_u64;

#[derive(Debug, Clone, Default)]
struct Node {
    /// Neighbor slots per layer, `neighbors[0]` being the dense bottom layer
    neighbors: Vec<Vec<usize>>,
}

/// Hierarchical navigable small world graph over index slots.
///
/// Node levels are drawn from a hash of the slot number, so rebuilding the graph from
/// the same vectors in the same order always produces the same structure.
#[derive(Debug)]
pub(crate) struct HnswGraph {
    metric: DistanceMetric,
    m: usize,
    m0: usize,
    ef_construction: usize,
    ef_search: usize,
    level_mult: f64,
    nodes: Vec<Node>,
    entry: Option<usize>,
    top_level: usize,
}

impl HnswGraph {
    pub(crate) fn new(
        metric: DistanceMetric,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Self {
        let m = m.max(2);
        Self {
            metric,
            m,
            m0: m * 2,
            ef_construction: ef_construction.max(m),
            ef_search: ef_search.max(1),
            level_mult: 1.0 / (m as f64).ln(),
            nodes: Vec::new(),
            entry: None,
            top_level: 0,
        }
    }

    fn level_for(&self, slot: usize) -> usize {
        let mut x = (slot as u64) ^ LEVEL_SEED;
        // splitmix64
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        x ^= x >> 31;
        let uniform = ((x >> 11) as f64 + 1.0) / (1_u64 << 53) as f64;
        let level = (-uniform.ln() * self.level_mult).floor() as usize;
        level.min(MAX_LEVEL)
    }

    fn neighbors(&self, slot: usize, layer: usize) -> &[usize] {
        self.nodes
            .get(slot)
            .and_then(|node| node.neighbors.get(layer))
            .map_or(&[][..], Vec::as_slice)
    }

    fn score(query: &Query<'_>, slots: &[Slot], slot: usize) -> Option<Scored> {
        slots.get(slot).map(|entry| Scored {
            slot,
            score: query.score(&entry.vector, entry.norm),
        })
    }

    /// Best-first expansion of one layer, returning up to `ef` slots best first.
    fn search_layer(
        &self,
        query: &Query<'_>,
        entry: usize,
        ef: usize,
        layer: usize,
        slots: &[Slot],
    ) -> Vec<Scored> {
        let Some(start) = Self::score(query, slots, entry) else {
            return Vec::new();
        };
        let mut visited = HashSet::from([entry]);
        let mut candidates = BinaryHeap::from([start]);
        let mut results = BinaryHeap::from([Reverse(start)]);

        while let Some(current) = candidates.pop() {
            let worst = results.peek().map(|Reverse(s)| *s);
            if results.len() >= ef && worst.is_some_and(|worst| current < worst) {
                break;
            }
            for &neighbor in self.neighbors(current.slot, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(scored) = Self::score(query, slots, neighbor) else {
                    continue;
                };
                let worst = results.peek().map(|Reverse(s)| *s);
                if results.len() < ef || worst.is_some_and(|worst| scored > worst) {
                    candidates.push(scored);
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Scored> = results.into_iter().map(|Reverse(s)| s).collect();
        found.sort_unstable_by(|a, b| b.cmp(a));
        found
    }

    fn descend(&self, query: &Query<'_>, mut entry: usize, above: usize, slots: &[Slot]) -> usize {
        for layer in (above + 1..=self.top_level).rev() {
            if let Some(best) = self.search_layer(query, entry, 1, layer, slots).first() {
                entry = best.slot;
            }
        }
        entry
    }

    fn connect(&mut self, node: usize, new: usize, layer: usize, slots: &[Slot]) {
        let limit = if layer == 0 { self.m0 } else { self.m };
        let Some(links) = self
            .nodes
            .get_mut(node)
            .and_then(|n| n.neighbors.get_mut(layer))
        else {
            return;
        };
        links.push(new);
        if links.len() <= limit {
            return;
        }

        let Some(base) = slots.get(node) else {
            return;
        };
        let query = Query::with_norm(self.metric, &base.vector, base.norm);
        let mut scored: Vec<Scored> = links
            .iter()
            .filter_map(|&slot| Self::score(&query, slots, slot))
            .collect();
        scored.sort_unstable_by(|a, b| b.cmp(a));
        scored.truncate(limit);
        *links = scored.into_iter().map(|s| s.slot).collect();
    }
}

impl NeighborSearch for HnswGraph {
    fn insert(&mut self, slot: usize, slots: &[Slot]) {
        let Some(entry_vector) = slots.get(slot) else {
            return;
        };
        if self.nodes.len() < slot {
            self.nodes.resize_with(slot, Node::default);
        }
        let level = self.level_for(slot);
        let node = Node {
            neighbors: vec![Vec::new(); level + 1],
        };
        if let Some(existing) = self.nodes.get_mut(slot) {
            *existing = node;
        } else {
            self.nodes.push(node);
        }

        let Some(mut entry) = self.entry else {
            self.entry = Some(slot);
            self.top_level = level;
            return;
        };

        let query = Query::with_norm(self.metric, &entry_vector.vector, entry_vector.norm);
        entry = self.descend(&query, entry, level, slots);

        for layer in (0..=level.min(self.top_level)).rev() {
            let candidates = self.search_layer(&query, entry, self.ef_construction, layer, slots);
            let selected: Vec<usize> = candidates
                .iter()
                .filter(|s| s.slot != slot)
                .take(self.m)
                .map(|s| s.slot)
                .collect();
            for &neighbor in &selected {
                self.connect(neighbor, slot, layer, slots);
            }
            if let Some(links) = self
                .nodes
                .get_mut(slot)
                .and_then(|n| n.neighbors.get_mut(layer))
            {
                *links = selected;
            }
            if let Some(best) = candidates.first() {
                entry = best.slot;
            }
        }

        if level > self.top_level {
            self.top_level = level;
            self.entry = Some(slot);
        }
    }

    fn search(
        &self,
        query: &Query<'_>,
        k: usize,
        slots: &[Slot],
        accept: &dyn Fn(usize) -> bool,
    ) -> Vec<Scored> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let entry = self.descend(query, entry, 0, slots);
        self.search_layer(query, entry, self.ef_search.max(k), 0, slots)
            .into_iter()
            .filter(|s| accept(s.slot))
            .take(k)
            .collect()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.entry = None;
        self.top_level = 0;
    }
}
