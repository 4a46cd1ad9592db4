#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Similarity measure, fixed for the lifetime of an index.
///
/// Every metric is reported as a score where higher means closer: cosine similarity,
/// raw inner product, or `1 / (1 + euclidean distance)` for L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
    InnerProduct,
}

impl DistanceMetric {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
            Self::InnerProduct => "inner_product",
        }
    }

    /// Score `a` against `b`, given their precomputed euclidean norms.
    #[inline]
    pub fn score(&self, a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
        match self {
            Self::Cosine => {
                let denominator = a_norm * b_norm;
                if denominator == 0.0 {
                    0.0
                } else {
                    dot(a, b) / denominator
                }
            }
            Self::InnerProduct => dot(a, b),
            Self::L2 => 1.0 / (1.0 + euclidean(a, b)),
        }
    }
}

impl fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// A query vector bound to the index metric
#[derive(Debug, Clone, Copy)]
pub(crate) struct Query<'a> {
    metric: DistanceMetric,
    vector: &'a [f32],
    norm: f32,
}

impl<'a> Query<'a> {
    pub(crate) fn new(metric: DistanceMetric, vector: &'a [f32]) -> Self {
        Self {
            metric,
            vector,
            norm: norm(vector),
        }
    }

    pub(crate) fn with_norm(metric: DistanceMetric, vector: &'a [f32], norm: f32) -> Self {
        Self {
            metric,
            vector,
            norm,
        }
    }

    pub(crate) fn score(&self, other: &[f32], other_norm: f32) -> f32 {
        self.metric.score(self.vector, self.norm, other, other_norm)
    }
}

/// A slot paired with its score.
///
/// Ordered so that "greater" means "better": higher score first, then lower slot, which
/// is earlier insertion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Scored {
    pub slot: usize,
    pub score: f32,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort best first
pub(crate) fn rank(scored: &mut [Scored]) {
    scored.sort_unstable_by(|a, b| b.cmp(a));
}
