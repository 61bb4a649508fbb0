//! Offline retrieval quality metrics over ranked id lists.
//!
//! Every metric returns 0.0 for degenerate input (`k == 0`, no relevant
//! documents, zero ideal DCG) instead of dividing by zero.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Retrieved ids (in rank order) and the ground-truth relevant ids for one
/// query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryJudgement {
    /// Ids returned by the retriever, best first.
    pub retrieved: Vec<String>,
    /// Ids judged relevant.
    pub relevant: Vec<String>,
}

fn relevant_set<S: AsRef<str>>(relevant: &[S]) -> HashSet<&str> {
    relevant.iter().map(AsRef::as_ref).collect()
}

fn hits_in_top_k<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> usize {
    retrieved
        .iter()
        .take(k)
        .filter(|id| relevant.contains(id.as_ref()))
        .count()
}

/// Fraction of the top `k` that is relevant.
pub fn precision_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &[S], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_in_top_k(retrieved, &relevant_set(relevant), k) as f64 / k as f64
}

/// Fraction of the relevant set found in the top `k`.
pub fn recall_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &[S], k: usize) -> f64 {
    let relevant = relevant_set(relevant);
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top_k(retrieved, &relevant, k) as f64 / relevant.len() as f64
}

/// Harmonic mean of precision@k and recall@k.
pub fn f1_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &[S], k: usize) -> f64 {
    let p = precision_at_k(retrieved, relevant, k);
    let r = recall_at_k(retrieved, relevant, k);
    if p + r == 0.0 {
        return 0.0;
    }
    2.0 * p * r / (p + r)
}

/// Reciprocal rank of the first relevant id (0.0 when none is retrieved).
pub fn mean_reciprocal_rank<S: AsRef<str>>(retrieved: &[S], relevant: &[S]) -> f64 {
    let relevant = relevant_set(relevant);
    retrieved
        .iter()
        .position(|id| relevant.contains(id.as_ref()))
        .map_or(0.0, |pos| 1.0 / (pos + 1) as f64)
}

/// Discounted cumulative gain over graded relevance scores in rank order.
pub fn dcg_at_k(relevance: &[f64], k: usize) -> f64 {
    relevance
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, rel)| rel / ((i + 2) as f64).log2())
        .sum()
}

/// DCG normalized by the DCG of the ideal (descending) ordering.
pub fn ndcg_at_k(relevance: &[f64], k: usize) -> f64 {
    let dcg = dcg_at_k(relevance, k);
    let mut ideal = relevance.to_vec();
    ideal.sort_by(|a, b| b.total_cmp(a));
    let idcg = dcg_at_k(&ideal, k);
    if idcg > 0.0 {
        dcg / idcg
    } else {
        0.0
    }
}

/// Average precision of one query, truncated at `k`.
pub fn average_precision_at_k(judgement: &QueryJudgement, k: usize) -> f64 {
    let relevant = relevant_set(&judgement.relevant);
    if relevant.is_empty() {
        return 0.0;
    }
    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (i, id) in judgement.retrieved.iter().take(k).enumerate() {
        if relevant.contains(id.as_str()) {
            hits += 1;
            precision_sum += hits as f64 / (i + 1) as f64;
        }
    }
    precision_sum / relevant.len() as f64
}

/// Mean of [`average_precision_at_k`] over all queries.
pub fn map_at_k(judgements: &[QueryJudgement], k: usize) -> f64 {
    if judgements.is_empty() {
        return 0.0;
    }
    let total: f64 = judgements
        .iter()
        .map(|j| average_precision_at_k(j, k))
        .sum();
    total / judgements.len() as f64
}
