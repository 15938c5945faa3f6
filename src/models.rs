/// Core data types shared by the retrieval pipeline.
///
/// `TextChunk`s come from the ingestion side and are read-only here, except for the
/// lazily populated `embedding`. Everything else is produced per request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One retrievable, paragraph-sized unit of a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    /// Globally unique chunk identifier
    pub id: String,
    pub paper_id: String,
    pub paper_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub text: String,
    /// Section heading the chunk was cut from (e.g. "Abstract", "Results")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Position within the paper, strictly increasing per paper
    pub chunk_index: u32,
    /// Dense vector, filled in once by `embedding::embed_chunks`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Which retrieval method produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Bm25,
    Dense,
    Hybrid,
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalSource::Bm25 => write!(f, "bm25"),
            RetrievalSource::Dense => write!(f, "dense"),
            RetrievalSource::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// A scored chunk from one retrieval method.
///
/// `score` is method-local: BM25 and cosine scores are not comparable until fused.
/// `relevance_score` is set once a result has passed through the reranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub chunk: TextChunk,
    pub score: f64,
    pub source: RetrievalSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl RetrievalResult {
    pub fn new(chunk: TextChunk, score: f64, source: RetrievalSource) -> Self {
        RetrievalResult {
            chunk,
            score,
            source,
            relevance_score: None,
        }
    }
}

/// A chunk after relevance reranking, ordered by `relevance_score` descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankResult {
    pub chunk: TextChunk,
    /// Score the candidate carried into the reranker
    pub score: f64,
    /// Normalized relevance in [0, 1]
    pub relevance_score: f64,
}

/// Display-ready evidence for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub paper_id: String,
    pub paper_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// At most 300 characters, cut at a sentence boundary where possible
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}
