/// Dense retrieval: cosine similarity between the query embedding and chunk embeddings.

use crate::embedding::EmbeddingClient;
use crate::errors::LitragError;
use crate::models::{RetrievalResult, RetrievalSource, TextChunk};

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector has zero magnitude. Vectors of different
/// lengths indicate corrupted upstream data and are an error, never a silent 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, LitragError> {
    if a.len() != b.len() {
        return Err(LitragError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Rank chunks by similarity to an already computed query embedding.
///
/// Chunks without an embedding are skipped rather than scored as 0.
pub fn rank_by_similarity(
    query_embedding: &[f32],
    chunks: &[TextChunk],
    top_k: usize,
) -> Result<Vec<RetrievalResult>, LitragError> {
    let mut scored = Vec::new();
    for chunk in chunks {
        let Some(embedding) = chunk.embedding.as_deref() else {
            continue;
        };
        let similarity = cosine_similarity(query_embedding, embedding)?;
        scored.push((chunk, similarity));
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(chunk, score)| RetrievalResult::new(chunk.clone(), score, RetrievalSource::Dense))
        .collect())
}

/// Dense search results plus the token cost of embedding the query.
#[derive(Debug, Clone)]
pub struct DenseSearchOutput {
    pub results: Vec<RetrievalResult>,
    pub query_tokens: u64,
}

/// Embed `query` and rank `chunks` by cosine similarity.
pub async fn dense_search(
    query: &str,
    chunks: &[TextChunk],
    top_k: usize,
    client: &EmbeddingClient,
) -> Result<DenseSearchOutput, LitragError> {
    let query_embedding = client.embed(query).await?;
    let results = rank_by_similarity(&query_embedding.vector, chunks, top_k)?;

    tracing::debug!(
        candidates = chunks.len(),
        hits = results.len(),
        query_tokens = query_embedding.tokens,
        "Dense search complete"
    );

    Ok(DenseSearchOutput {
        results,
        query_tokens: query_embedding.tokens,
    })
}
