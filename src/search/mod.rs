/// Retrieval over in-memory chunk sets: lexical, dense, fused, and the orchestrator
/// that ties them together.

pub mod bm25;
pub mod dense;
pub mod fusion;
pub mod hybrid;
pub mod tokenize;

// Re-export key types for convenience
pub use fusion::{reciprocal_rank_fusion, WeightedList, RRF_K};
pub use hybrid::{build_context, paper_ids, CachedSearch, HybridRetrieval, HybridRetriever, RetrievalConfig, RetrievalStats};
pub use tokenize::tokenize;
