
use super::metric::{Query, Scored, rank};
use super::{NeighborSearch, Slot};

/// Brute-force backend: every search scores every accepted slot.
#[derive(Debug, Default)]
pub(crate) struct FlatIndex;

impl NeighborSearch for FlatIndex {
    fn insert(&mut self, _slot: usize, _slots: &[Slot]) {}

    fn search(
        &self,
        query: &Query<'_>,
        k: usize,
        slots: &[Slot],
        accept: &dyn Fn(usize) -> bool,
    ) -> Vec<Scored> {
        exact_search(query, k, slots, accept)
    }

    fn clear(&mut self) {}
}

/// Exact top-`k` over the accepted slots, best first with ties in slot order.
pub(crate) fn exact_search(
    query: &Query<'_>,
    k: usize,
    slots: &[Slot],
    accept: &dyn Fn(usize) -> bool,
) -> Vec<Scored> {
    let mut scored: Vec<Scored> = slots
        .iter()
        .enumerate()
        .filter(|(slot, _)| accept(*slot))
        .map(|(slot, entry)| Scored {
            slot,
            score: query.score(&entry.vector, entry.norm),
        })
        .collect();
    rank(&mut scored);
    scored.truncate(k);
    scored
}
