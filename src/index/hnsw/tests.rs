use super::*;
use crate::index::flat::exact_search;
use crate::index::metric::norm;

/// Deterministic pseudo-random vectors
fn vectors(count: usize, dimension: usize) -> Vec<Vec<f32>> {
    let mut state: u64 = 42;
    (0..count)
        .map(|_| {
            (0..dimension)
                .map(|_| {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    ((state >> 33) as f32 / (1_u64 << 31) as f32) - 0.5
                })
                .collect()
        })
        .collect()
}

fn build(vectors: &[Vec<f32>]) -> (HnswGraph, Vec<Slot>) {
    let mut graph = HnswGraph::new(DistanceMetric::Cosine, 8, 64, 64);
    let mut slots = Vec::new();
    for vector in vectors {
        slots.push(Slot {
            norm: norm(vector),
            vector: vector.clone(),
            record: None,
        });
        graph.insert(slots.len() - 1, &slots);
    }
    (graph, slots)
}

#[test]
fn empty_graph_finds_nothing() {
    let graph = HnswGraph::new(DistanceMetric::Cosine, 16, 200, 64);
    let query = Query::new(DistanceMetric::Cosine, &[1.0, 0.0]);
    assert!(graph.search(&query, 5, &[], &|_| true).is_empty());
}

#[test]
fn finds_exact_match_first() {
    let data = vectors(300, 16);
    let (graph, slots) = build(&data);

    for target in [0, 57, 123, 299] {
        let query = Query::new(DistanceMetric::Cosine, &data[target]);
        let found = graph.search(&query, 5, &slots, &|_| true);
        assert_eq!(found.first().map(|s| s.slot), Some(target));
    }
}

#[test]
fn recall_against_exact_search() {
    let data = vectors(500, 24);
    let (graph, slots) = build(&data);
    let queries = vectors(20, 24);

    let mut hits = 0;
    for query in &queries {
        let query = Query::new(DistanceMetric::Cosine, query);
        let exact: HashSet<usize> = exact_search(&query, 10, &slots, &|_| true)
            .iter()
            .map(|s| s.slot)
            .collect();
        hits += graph
            .search(&query, 10, &slots, &|_| true)
            .iter()
            .filter(|s| exact.contains(&s.slot))
            .count();
    }
    // 200 possible
    assert!(hits >= 170, "recall too low: {hits}/200");
}

#[test]
fn rejected_slots_are_skipped() {
    let data = vectors(100, 8);
    let (graph, slots) = build(&data);
    let query = Query::new(DistanceMetric::Cosine, &data[10]);

    let found = graph.search(&query, 5, &slots, &|slot| slot != 10);
    assert!(!found.is_empty());
    assert!(found.iter().all(|s| s.slot != 10));
}

#[test]
fn results_are_sorted_best_first() {
    let data = vectors(200, 8);
    let (graph, slots) = build(&data);
    let query = Query::new(DistanceMetric::Cosine, &data[3]);

    let found = graph.search(&query, 20, &slots, &|_| true);
    assert_eq!(found.len(), 20);
    assert!(found.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn levels_are_deterministic() {
    let graph = HnswGraph::new(DistanceMetric::Cosine, 16, 200, 64);
    let levels: Vec<usize> = (0..1000).map(|slot| graph.level_for(slot)).collect();
    let again: Vec<usize> = (0..1000).map(|slot| graph.level_for(slot)).collect();
    assert_eq!(levels, again);
    assert!(levels.iter().all(|&level| level <= MAX_LEVEL));
    // roughly 1/m of nodes reach layer one
    let upper = levels.iter().filter(|&&level| level > 0).count();
    assert!((20..=150).contains(&upper), "unexpected level spread: {upper}");
}

#[test]
fn clear_resets_the_graph() {
    let data = vectors(50, 4);
    let (mut graph, slots) = build(&data);
    graph.clear();
    let query = Query::new(DistanceMetric::Cosine, &data[0]);
    assert!(graph.search(&query, 5, &slots, &|_| true).is_empty());
}
