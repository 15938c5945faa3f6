/// Relevance reranking of fused candidates.
///
/// A cross-encoder API provides the preferred ordering. Reranking is an optimization
/// over an already usable ranking, so every failure path (no credential, transport
/// error, non-2xx status) degrades to `simple_rerank` instead of failing retrieval.

pub mod cohere;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{RerankResult, RetrievalResult};
use crate::search::bm25::section_boost;
use crate::search::tokenize::normalize;

/// Errors that can occur while calling a rerank provider.
#[derive(Debug, Error)]
pub enum RerankError {
    /// Request failed before a response arrived, or the response was unusable
    #[error("Rerank request error: {0}")]
    Request(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// One scored document from a rerank provider.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankScore {
    /// Position of the document in the request
    pub index: usize,
    pub relevance_score: f64,
}

/// Core trait for cross-encoder style relevance APIs.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn RerankProvider>).
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Score `documents` against `query`, returning at most `top_n` results.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankScore>, RerankError>;

    /// Return the model name identifier used by this provider.
    fn model_name(&self) -> &str;
}

/// How the final ordering was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMethod {
    /// Provider API scored the candidates
    Api,
    /// Local heuristic after a missing credential or provider failure
    Fallback,
    /// Reranking disabled or nothing to rerank
    Skipped,
}

impl fmt::Display for RerankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RerankMethod::Api => write!(f, "api"),
            RerankMethod::Fallback => write!(f, "fallback"),
            RerankMethod::Skipped => write!(f, "skipped"),
        }
    }
}

/// Reranked results and the method that produced them.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub results: Vec<RerankResult>,
    pub method: RerankMethod,
}

/// Section multipliers used by the local heuristic.
pub const SIMPLE_RERANK_BOOSTS: &[(&str, f64)] = &[
    ("abstract", 1.3),
    ("conclusion", 1.3),
    ("results", 1.2),
    ("discussion", 1.2),
];

/// Reranker with an optional provider and a deterministic local fallback.
#[derive(Clone, Default)]
pub struct Reranker {
    provider: Option<Arc<dyn RerankProvider>>,
}

impl Reranker {
    pub fn new(provider: Option<Arc<dyn RerankProvider>>) -> Self {
        Reranker { provider }
    }

    /// Reranker that always uses the local heuristic.
    pub fn local() -> Self {
        Reranker { provider: None }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Rerank `candidates` against `query`, keeping the best `top_k`. Never fails.
    pub async fn rerank(&self, query: &str, candidates: &[RetrievalResult], top_k: usize) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome {
                results: Vec::new(),
                method: RerankMethod::Skipped,
            };
        }

        let Some(provider) = &self.provider else {
            tracing::warn!("No rerank API key configured, using local heuristic reranker");
            return RerankOutcome {
                results: simple_rerank(query, candidates, top_k),
                method: RerankMethod::Fallback,
            };
        };

        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();

        match provider.rerank(query, &documents, top_k).await {
            Ok(scores) => {
                let results = apply_scores(candidates, &scores, top_k);
                tracing::debug!(
                    model = %provider.model_name(),
                    candidates = candidates.len(),
                    kept = results.len(),
                    "Reranked via provider"
                );
                RerankOutcome {
                    results,
                    method: RerankMethod::Api,
                }
            }
            Err(e) => {
                tracing::error!(
                    model = %provider.model_name(),
                    error = %e,
                    "Rerank provider failed, using local heuristic reranker"
                );
                RerankOutcome {
                    results: simple_rerank(query, candidates, top_k),
                    method: RerankMethod::Fallback,
                }
            }
        }
    }
}

/// Map provider scores back onto candidates.
///
/// Out-of-range and duplicate indices are dropped; scores are clamped to [0, 1].
fn apply_scores(candidates: &[RetrievalResult], scores: &[RerankScore], top_k: usize) -> Vec<RerankResult> {
    let mut seen = vec![false; candidates.len()];
    let mut results: Vec<RerankResult> = scores
        .iter()
        .filter_map(|s| {
            let slot = seen.get_mut(s.index)?;
            if *slot {
                return None;
            }
            *slot = true;
            let candidate = &candidates[s.index];
            Some(RerankResult {
                chunk: candidate.chunk.clone(),
                score: candidate.score,
                relevance_score: s.relevance_score.clamp(0.0, 1.0),
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(top_k);
    results
}

/// Deterministic term-overlap reranker.
///
/// relevance = (matching query terms + 2 if the whole query appears verbatim) / query terms,
/// times a section boost, clamped to [0, 1]. Query and chunk text are normalized the way
/// the lexical index normalizes them (lowercase, punctuation to spaces) without stemming.
/// Query terms are the words longer than two characters; matching is substring containment.
/// Ties keep the candidates' incoming order.
pub fn simple_rerank(query: &str, candidates: &[RetrievalResult], top_k: usize) -> Vec<RerankResult> {
    let phrase = collapse_whitespace(&normalize(query));
    let terms: Vec<&str> = phrase
        .split(' ')
        .filter(|t| t.chars().count() > 2)
        .collect();
    let denominator = terms.len().max(1) as f64;

    let mut results: Vec<RerankResult> = candidates
        .iter()
        .map(|candidate| {
            let text = collapse_whitespace(&normalize(&candidate.chunk.text));
            let overlap = terms.iter().filter(|t| text.contains(*t)).count() as f64;
            let exact_bonus = if !phrase.is_empty() && text.contains(&phrase) {
                2.0
            } else {
                0.0
            };
            let boost = section_boost(candidate.chunk.section.as_deref(), SIMPLE_RERANK_BOOSTS);
            let relevance = ((overlap + exact_bonus) / denominator * boost).clamp(0.0, 1.0);

            RerankResult {
                chunk: candidate.chunk.clone(),
                score: candidate.score,
                relevance_score: relevance,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(top_k);
    results
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RetrievalSource, TextChunk};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(id: &str, text: &str, section: Option<&str>, score: f64) -> RetrievalResult {
        RetrievalResult::new(
            TextChunk {
                id: id.to_string(),
                paper_id: "p".to_string(),
                paper_title: "Paper".to_string(),
                authors: None,
                year: None,
                text: text.to_string(),
                section: section.map(str::to_string),
                page_number: None,
                chunk_index: 0,
                embedding: None,
            },
            score,
            RetrievalSource::Hybrid,
        )
    }

    fn candidates() -> Vec<RetrievalResult> {
        vec![
            candidate("unrelated", "Weather patterns over the Atlantic.", None, 0.9),
            candidate("partial", "Insulin therapy outcomes in adults.", None, 0.5),
            candidate("exact", "We study insulin resistance in mice.", None, 0.1),
        ]
    }

    struct FixedProvider {
        scores: Vec<RerankScore>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RerankProvider for FixedProvider {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
            _top_n: usize,
        ) -> Result<Vec<RerankScore>, RerankError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl RerankProvider for FailingProvider {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
            _top_n: usize,
        ) -> Result<Vec<RerankScore>, RerankError> {
            Err(RerankError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_simple_rerank_scores() {
        let results = simple_rerank("insulin resistance", &candidates(), 10);
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "partial", "unrelated"]);
        // (2 terms + 2 verbatim bonus) / 2, clamped
        assert_eq!(results[0].relevance_score, 1.0);
        assert!((results[1].relevance_score - 0.5).abs() < 1e-12);
        assert_eq!(results[2].relevance_score, 0.0);
        // Incoming score is preserved
        assert_eq!(results[0].score, 0.1);
    }

    #[test]
    fn test_simple_rerank_section_boost_and_clamp() {
        let pool = vec![
            candidate("plain", "graph neural methods", None, 0.0),
            candidate("abstract", "graph neural methods", Some("Abstract"), 0.0),
            candidate("results", "graph only", Some("Results"), 0.0),
        ];
        let results = simple_rerank("graph transformers", &pool, 10);
        let by_id = |id: &str| results.iter().find(|r| r.chunk.id == id).unwrap().relevance_score;
        assert!((by_id("plain") - 0.5).abs() < 1e-12);
        assert!((by_id("abstract") - 0.65).abs() < 1e-12);
        assert!((by_id("results") - 0.6).abs() < 1e-12);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.relevance_score)));
    }

    #[test]
    fn test_simple_rerank_ties_keep_order_and_truncate() {
        let pool = vec![
            candidate("first", "nothing here", None, 0.3),
            candidate("second", "nothing here either", None, 0.2),
        ];
        let results = simple_rerank("quantum chromodynamics", &pool, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "first");
    }

    #[test]
    fn test_simple_rerank_ignores_question_punctuation() {
        let pool = vec![candidate("c", "Insomnia impairs memory in adults.", None, 0.0)];
        let question = simple_rerank("insomnia memory?", &pool, 1);
        let bare = simple_rerank("insomnia memory", &pool, 1);
        assert_eq!(question[0].relevance_score, 1.0);
        assert_eq!(question[0].relevance_score, bare[0].relevance_score);

        // Punctuation on both sides still counts as a verbatim match
        let pool = vec![candidate("v", "Does sleep, in fact, help memory?", None, 0.0)];
        let results = simple_rerank("Does sleep in fact help memory!", &pool, 1);
        assert_eq!(results[0].relevance_score, 1.0);
    }

    #[tokio::test]
    async fn test_no_provider_falls_back() {
        let reranker = Reranker::local();
        let outcome = reranker.rerank("insulin resistance", &candidates(), 2).await;
        assert_eq!(outcome.method, RerankMethod::Fallback);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].chunk.id, "exact");
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back() {
        let reranker = Reranker::new(Some(Arc::new(FailingProvider)));
        let outcome = reranker.rerank("insulin resistance", &candidates(), 2).await;
        assert_eq!(outcome.method, RerankMethod::Fallback);
        let ids: Vec<&str> = outcome.results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "partial"]);
    }

    #[tokio::test]
    async fn test_provider_scores_are_applied() {
        let provider = Arc::new(FixedProvider {
            scores: vec![
                RerankScore { index: 1, relevance_score: 0.4 },
                RerankScore { index: 0, relevance_score: 0.95 },
                RerankScore { index: 7, relevance_score: 0.99 },
                RerankScore { index: 0, relevance_score: 0.1 },
            ],
            calls: AtomicUsize::new(0),
        });
        let reranker = Reranker::new(Some(provider.clone()));
        let outcome = reranker.rerank("q", &candidates(), 5).await;

        assert_eq!(outcome.method, RerankMethod::Api);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let ids: Vec<&str> = outcome.results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["unrelated", "partial"]);
        assert_eq!(outcome.results[0].relevance_score, 0.95);
        assert_eq!(outcome.results[0].score, 0.9);
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_provider() {
        let provider = Arc::new(FixedProvider {
            scores: Vec::new(),
            calls: AtomicUsize::new(0),
        });
        let reranker = Reranker::new(Some(provider.clone()));
        let outcome = reranker.rerank("q", &[], 5).await;
        assert_eq!(outcome.method, RerankMethod::Skipped);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
