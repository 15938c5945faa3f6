/// Reciprocal Rank Fusion (RRF) of weighted ranked lists.

use std::collections::HashMap;

use crate::models::{RetrievalResult, RetrievalSource};

/// Smoothing constant from the original RRF paper; dampens top-1 dominance.
pub const RRF_K: f64 = 60.0;

/// A ranked list and the weight its contributions are multiplied by.
#[derive(Debug, Clone)]
pub struct WeightedList {
    pub results: Vec<RetrievalResult>,
    pub weight: f64,
}

impl WeightedList {
    pub fn new(results: Vec<RetrievalResult>, weight: f64) -> Self {
        WeightedList { results, weight }
    }
}

/// Fuse ranked lists via weighted Reciprocal Rank Fusion.
///
/// Each item at zero-based rank r in a list contributes `weight / (k + r + 1)` to its
/// chunk's score, accumulated across lists by chunk id. Output contains every chunk seen
/// in any list, sorted by fused score descending with chunk id as tie-breaker, so the
/// result does not depend on the order the lists are given in.
///
/// A single list is passed through untouched (original scores and order); no lists
/// yields an empty ranking.
pub fn reciprocal_rank_fusion(mut lists: Vec<WeightedList>, k: f64) -> Vec<RetrievalResult> {
    match lists.len() {
        0 => return Vec::new(),
        1 => return lists.pop().map(|l| l.results).unwrap_or_default(),
        _ => {}
    }

    let mut fused: HashMap<String, RetrievalResult> = HashMap::new();

    for list in lists {
        for (rank, result) in list.results.into_iter().enumerate() {
            let contribution = list.weight * (1.0 / (k + rank as f64 + 1.0));
            fused
                .entry(result.chunk.id.clone())
                .and_modify(|existing| existing.score += contribution)
                .or_insert_with(|| RetrievalResult {
                    score: contribution,
                    source: RetrievalSource::Hybrid,
                    relevance_score: None,
                    chunk: result.chunk,
                });
        }
    }

    let mut ranked: Vec<RetrievalResult> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    ranked
}
