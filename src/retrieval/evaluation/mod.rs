//! Ranking-quality metrics for judged queries.


use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RetrievalResponse;

pub const DEFAULT_CUTOFFS: [usize; 4] = [1, 3, 5, 10];

/// Metrics over the first `k` retrieved ids
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutoffMetrics {
    pub k: usize,
    /// Relevant share of what was returned within `k`
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub ndcg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvaluation {
    pub query_id: String,
    pub cutoffs: Vec<CutoffMetrics>,
    pub reciprocal_rank: f64,
    pub average_precision: f64,
}

impl QueryEvaluation {
    #[inline]
    pub fn at(&self, k: usize) -> Option<&CutoffMetrics> {
        self.cutoffs.iter().find(|metrics| metrics.k == k)
    }
}

/// One judged query: what came back, in rank order, and what should have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgedQuery {
    pub query_id: String,
    pub retrieved: Vec<String>,
    pub relevant: Vec<String>,
}

/// Means over a set of query evaluations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_queries: usize,
    pub cutoffs: Vec<CutoffMetrics>,
    /// Mean reciprocal rank
    pub mrr: f64,
    /// Mean average precision
    pub map: f64,
}

/// Scores ranked id lists against binary relevance judgements.
///
/// Repeated ids in a ranking count once, at their first position.
#[derive(Debug, Clone)]
pub struct RetrievalEvaluator {
    cutoffs: Vec<usize>,
}

impl Default for RetrievalEvaluator {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_CUTOFFS)
    }
}

impl RetrievalEvaluator {
    /// Zero cutoffs are ignored; the rest are sorted and deduplicated.
    #[inline]
    pub fn new(cutoffs: impl IntoIterator<Item = usize>) -> Self {
        let mut cutoffs: Vec<usize> = cutoffs.into_iter().filter(|&k| k > 0).collect();
        cutoffs.sort_unstable();
        cutoffs.dedup();
        Self { cutoffs }
    }

    #[inline]
    pub fn cutoffs(&self) -> &[usize] {
        &self.cutoffs
    }

    #[inline]
    pub fn evaluate(
        &self,
        query_id: &str,
        retrieved: &[String],
        relevant: &[String],
    ) -> QueryEvaluation {
        let relevant: HashSet<&str> = relevant.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let hits: Vec<bool> = retrieved
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| relevant.contains(id.as_str()))
            .collect();

        let cutoffs = self
            .cutoffs
            .iter()
            .map(|&k| cutoff_metrics(&hits, relevant.len(), k))
            .collect();

        QueryEvaluation {
            query_id: query_id.to_string(),
            cutoffs,
            reciprocal_rank: hits
                .iter()
                .position(|&hit| hit)
                .map_or(0.0, |idx| 1.0 / (idx + 1) as f64),
            average_precision: average_precision(&hits, relevant.len()),
        }
    }

    /// Evaluate the ids of a retrieval response in rank order.
    #[inline]
    pub fn evaluate_response(
        &self,
        query_id: &str,
        response: &RetrievalResponse,
        relevant: &[String],
    ) -> QueryEvaluation {
        let retrieved: Vec<String> = response.results.iter().map(|r| r.id.clone()).collect();
        self.evaluate(query_id, &retrieved, relevant)
    }

    #[inline]
    pub fn evaluate_batch(&self, queries: &[JudgedQuery]) -> EvaluationSummary {
        let evaluations: Vec<QueryEvaluation> = queries
            .iter()
            .map(|query| self.evaluate(&query.query_id, &query.retrieved, &query.relevant))
            .collect();
        self.summarize(&evaluations)
    }

    #[inline]
    pub fn summarize(&self, evaluations: &[QueryEvaluation]) -> EvaluationSummary {
        let total = evaluations.len();
        let mean = |values: &mut dyn Iterator<Item = f64>| {
            if total == 0 {
                0.0
            } else {
                values.sum::<f64>() / total as f64
            }
        };

        let cutoffs = self
            .cutoffs
            .iter()
            .map(|&k| {
                let at = |pick: fn(&CutoffMetrics) -> f64| {
                    mean(&mut evaluations.iter().map(|e| e.at(k).map_or(0.0, pick)))
                };
                CutoffMetrics {
                    k,
                    precision: at(|m| m.precision),
                    recall: at(|m| m.recall),
                    f1: at(|m| m.f1),
                    ndcg: at(|m| m.ndcg),
                }
            })
            .collect();

        let summary = EvaluationSummary {
            total_queries: total,
            cutoffs,
            mrr: mean(&mut evaluations.iter().map(|e| e.reciprocal_rank)),
            map: mean(&mut evaluations.iter().map(|e| e.average_precision)),
        };
        debug!(
            "Evaluated {} queries: MRR {:.3}, MAP {:.3}",
            summary.total_queries, summary.mrr, summary.map
        );
        summary
    }
}

fn cutoff_metrics(hits: &[bool], relevant: usize, k: usize) -> CutoffMetrics {
    let top = hits.get(..k.min(hits.len())).unwrap_or_default();
    let found = top.iter().filter(|&&hit| hit).count();

    let precision = if top.is_empty() {
        0.0
    } else {
        found as f64 / top.len() as f64
    };
    let recall = if relevant == 0 {
        0.0
    } else {
        found as f64 / relevant as f64
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    CutoffMetrics {
        k,
        precision,
        recall,
        f1,
        ndcg: ndcg(top, relevant),
    }
}

/// Position `idx` (0-based) is discounted by `log2(idx + 2)`.
fn discount(idx: usize) -> f64 {
    ((idx + 2) as f64).log2()
}

fn ndcg(top: &[bool], relevant: usize) -> f64 {
    let ideal_hits = relevant.min(top.len());
    if ideal_hits == 0 {
        return 0.0;
    }
    let ideal: f64 = (0..ideal_hits).map(|idx| 1.0 / discount(idx)).sum();
    let gained: f64 = top
        .iter()
        .enumerate()
        .filter(|&(_, &hit)| hit)
        .map(|(idx, _)| 1.0 / discount(idx))
        .sum();
    gained / ideal
}

fn average_precision(hits: &[bool], relevant: usize) -> f64 {
    if relevant == 0 {
        return 0.0;
    }
    let mut found: u32 = 0;
    let mut sum = 0.0;
    for (idx, _) in hits.iter().enumerate().filter(|&(_, &hit)| hit) {
        found += 1;
        sum += f64::from(found) / (idx + 1) as f64;
    }
    sum / relevant as f64
}
