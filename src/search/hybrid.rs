/// Hybrid retrieval orchestrator.
///
/// BM25 and dense search run concurrently over the same chunk slice, their rankings are
/// fused with weighted RRF, and the fused head is reranked. The output carries citations
/// and a numbered context block for the generation step, plus per-stage counts for cost
/// and degradation reporting.

use serde::{Deserialize, Serialize};

use crate::cache::{CachedResponse, ResponseCache};
use crate::embedding::{embed_chunks, EmbeddingClient, EmbeddingError};
use crate::errors::LitragError;
use crate::models::{Citation, RetrievalResult, RetrievalSource, TextChunk};
use crate::rerank::{RerankMethod, Reranker};
use super::bm25;
use super::dense::dense_search;
use super::fusion::{reciprocal_rank_fusion, WeightedList, RRF_K};

/// Maximum characters in a citation quote, ellipsis included.
pub const QUOTE_MAX_CHARS: usize = 300;

/// Tunable pipeline behavior.
///
/// Weights are fusion-time multipliers and need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates taken from each retriever and handed to the reranker
    pub top_k: usize,
    pub use_bm25: bool,
    pub use_dense_retrieval: bool,
    pub use_reranking: bool,
    pub bm25_weight: f64,
    pub dense_weight: f64,
    /// Final result count
    pub rerank_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            top_k: 20,
            use_bm25: true,
            use_dense_retrieval: true,
            use_reranking: true,
            bm25_weight: 0.4,
            dense_weight: 0.6,
            rerank_top_k: 10,
        }
    }
}

/// Per-stage counts for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub bm25_results: usize,
    pub dense_results: usize,
    pub fused_results: usize,
    pub final_results: usize,
    /// Chunks that were embedded during this call
    pub chunks_embedded: usize,
    /// Provider tokens spent on chunk and query embeddings
    pub embedding_tokens: u64,
    pub rerank_method: RerankMethod,
}

impl RetrievalStats {
    /// True when results are usable but the reranker had to fall back.
    pub fn degraded(&self) -> bool {
        self.rerank_method == RerankMethod::Fallback
    }
}

/// Output of a hybrid retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRetrieval {
    pub results: Vec<RetrievalResult>,
    pub citations: Vec<Citation>,
    pub stats: RetrievalStats,
}

/// Wires the retrievers, fusion and reranker into one pipeline.
#[derive(Clone)]
pub struct HybridRetriever {
    embedder: Option<EmbeddingClient>,
    reranker: Reranker,
}

impl HybridRetriever {
    /// `embedder` may be None when no embeddings credential is configured; dense
    /// retrieval then fails with a configuration error instead of being skipped.
    pub fn new(embedder: Option<EmbeddingClient>, reranker: Reranker) -> Self {
        HybridRetriever { embedder, reranker }
    }

    /// Run the full pipeline over `chunks`.
    ///
    /// Chunks missing an embedding get one (and keep it) when dense retrieval is on.
    pub async fn retrieve(
        &self,
        query: &str,
        chunks: &mut [TextChunk],
        config: &RetrievalConfig,
    ) -> Result<HybridRetrieval, LitragError> {
        if query.trim().is_empty() {
            return Err(LitragError::validation("query", "Query cannot be empty"));
        }

        let mut embedding_tokens = 0u64;
        let mut chunks_embedded = 0usize;

        let embedder = if config.use_dense_retrieval {
            let embedder = self.embedder.as_ref().ok_or_else(|| {
                EmbeddingError::NotConfigured(
                    "Dense retrieval is enabled but no embeddings API key is configured".to_string(),
                )
            })?;
            let embedded = embed_chunks(chunks, embedder).await?;
            chunks_embedded = embedded.embedded;
            embedding_tokens += embedded.tokens;
            Some(embedder)
        } else {
            None
        };

        let chunks: &[TextChunk] = chunks;

        let sparse = async {
            if !config.use_bm25 {
                return None;
            }
            let index = bm25::build_index(chunks);
            let mut results = bm25::search(query, &index, config.top_k);
            bm25::apply_academic_boosts(&mut results);
            Some(results)
        };

        let dense = async {
            match embedder {
                Some(client) => dense_search(query, chunks, config.top_k, client).await.map(Some),
                None => Ok(None),
            }
        };

        let (sparse, dense) = tokio::join!(sparse, dense);
        let dense = dense?;

        let bm25_results = sparse.as_ref().map_or(0, Vec::len);
        let dense_results = dense.as_ref().map_or(0, |d| d.results.len());

        let mut lists = Vec::with_capacity(2);
        if let Some(results) = sparse {
            lists.push(WeightedList::new(results, config.bm25_weight));
        }
        if let Some(output) = dense {
            embedding_tokens += output.query_tokens;
            lists.push(WeightedList::new(output.results, config.dense_weight));
        }

        let fused = reciprocal_rank_fusion(lists, RRF_K);
        let fused_results = fused.len();

        let (results, rerank_method) = if config.use_reranking && !fused.is_empty() {
            let source = fused.first().map_or(RetrievalSource::Hybrid, |r| r.source);
            let head = &fused[..fused.len().min(config.top_k)];
            let outcome = self.reranker.rerank(query, head, config.rerank_top_k).await;
            let results = outcome
                .results
                .into_iter()
                .map(|r| RetrievalResult {
                    chunk: r.chunk,
                    score: r.score,
                    source,
                    relevance_score: Some(r.relevance_score),
                })
                .collect::<Vec<_>>();
            (results, outcome.method)
        } else {
            let mut fused = fused;
            fused.truncate(config.rerank_top_k);
            (fused, RerankMethod::Skipped)
        };

        let citations = results.iter().map(build_citation).collect();

        let stats = RetrievalStats {
            bm25_results,
            dense_results,
            fused_results,
            final_results: results.len(),
            chunks_embedded,
            embedding_tokens,
            rerank_method,
        };

        tracing::info!(
            bm25 = stats.bm25_results,
            dense = stats.dense_results,
            fused = stats.fused_results,
            results = stats.final_results,
            embedding_tokens = stats.embedding_tokens,
            rerank = %stats.rerank_method,
            "Hybrid retrieval complete"
        );

        Ok(HybridRetrieval {
            results,
            citations,
            stats,
        })
    }
}

/// Outcome of a cache-aware retrieval.
#[derive(Debug, Clone)]
pub enum CachedSearch {
    /// A stored answer for this user, query and paper set
    Hit(CachedResponse),
    /// No usable entry; retrieval ran
    Miss(HybridRetrieval),
}

/// Distinct paper IDs of a chunk set, sorted. This is the paper set a cached answer is keyed on.
pub fn paper_ids(chunks: &[TextChunk]) -> Vec<String> {
    let mut ids: Vec<String> = chunks.iter().map(|c| c.paper_id.clone()).collect();
    ids.sort();
    ids.dedup();
    ids
}

impl HybridRetriever {
    /// Check the response cache first and only retrieve on a miss.
    ///
    /// Storing the generated answer stays with the caller, via
    /// `ResponseCache::set_cached_response` with `paper_ids(chunks)` and the miss's citations.
    pub async fn retrieve_cached(
        &self,
        cache: &ResponseCache,
        user_id: &str,
        query: &str,
        chunks: &mut [TextChunk],
        config: &RetrievalConfig,
    ) -> Result<CachedSearch, LitragError> {
        let papers = paper_ids(chunks);
        if let Some(hit) = cache.get_cached_response(user_id, query, &papers).await {
            tracing::info!(user_id = %user_id, papers = papers.len(), "Answer served from cache");
            return Ok(CachedSearch::Hit(hit));
        }
        self.retrieve(query, chunks, config).await.map(CachedSearch::Miss)
    }
}

/// Build the display citation for a final result.
pub fn build_citation(result: &RetrievalResult) -> Citation {
    let chunk = &result.chunk;
    Citation {
        paper_id: chunk.paper_id.clone(),
        paper_title: chunk.paper_title.clone(),
        authors: chunk.authors.clone(),
        year: chunk.year,
        section: chunk.section.clone(),
        quote: truncate_quote(&chunk.text, QUOTE_MAX_CHARS),
        page_number: chunk.page_number,
        relevance_score: Some(result.relevance_score.unwrap_or(result.score)),
    }
}

/// Shorten `text` to at most `max_chars` characters.
///
/// Cuts after the last sentence terminator (`.`, `?`, `!`) in the window when it lies
/// past the window's midpoint; otherwise hard-cuts and appends "...".
pub fn truncate_quote(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let window: Vec<char> = text.chars().take(max_chars).collect();
    if let Some(pos) = window.iter().rposition(|c| matches!(c, '.' | '?' | '!')) {
        if pos > max_chars / 2 {
            return window[..=pos].iter().collect();
        }
    }

    let keep = max_chars.saturating_sub(3);
    let cut: String = window[..keep].iter().collect();
    format!("{}...", cut.trim_end())
}

/// Render results as a numbered, citation-tagged block for a generation prompt.
///
/// Each entry reads `[n] From "<title>" (<section>, p.<page>): <text>`; missing
/// section or page parts are left out.
pub fn build_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let chunk = &result.chunk;
            let mut location = Vec::new();
            if let Some(section) = chunk.section.as_deref().filter(|s| !s.is_empty()) {
                location.push(section.to_string());
            }
            if let Some(page) = chunk.page_number {
                location.push(format!("p.{}", page));
            }
            let location = if location.is_empty() {
                String::new()
            } else {
                format!(" ({})", location.join(", "))
            };
            format!("[{}] From \"{}\"{}: {}", i + 1, chunk.paper_title, location, chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
