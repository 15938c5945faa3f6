/// Embedding provider trait and supporting types
///
/// Provides a pluggable interface for text embedding generation plus the batching
/// client the retrieval pipeline talks to. Provider failures are returned to the
/// caller as-is; retrying is the caller's decision.

pub mod openai;

use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use thiserror::Error;

use crate::errors::LitragError;
use crate::models::TextChunk;

/// Hard provider limit on texts per request.
pub const MAX_BATCH_SIZE: usize = 100;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Request failed before a response arrived, or the response was unusable
    #[error("Embedding generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Vectors for one batch of texts, in input order, with the provider-reported token usage.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: u64,
}

/// A single embedded text.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens: u64,
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn EmbeddingProvider>).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed up to MAX_BATCH_SIZE texts in one provider call.
    ///
    /// The returned vectors must be in the same order as `texts`.
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbeddingError>;

    /// Return the model name identifier (e.g., "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// Return the dimension of the embedding vectors produced by this model.
    fn dimension(&self) -> usize;
}

/// Batching front-end over an EmbeddingProvider.
///
/// Splits large requests into sub-batches of at most `batch_size` texts, issues them
/// concurrently, and reassembles the vectors in input order.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        EmbeddingClient {
            provider,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Embedding, LitragError> {
        let batch = self.embed_batch(&[text.to_string()]).await?;
        let vector = batch.vectors.into_iter().next().ok_or_else(|| {
            EmbeddingError::Generation("API returned empty embedding list".to_string())
        })?;
        Ok(Embedding {
            vector,
            tokens: batch.total_tokens,
        })
    }

    /// Embed many texts, respecting the per-call batch limit.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, LitragError> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch::default());
        }

        let calls = texts
            .chunks(self.batch_size)
            .map(|sub_batch| self.provider.embed_batch(sub_batch));
        let batches = try_join_all(calls).await?;

        let expected_dim = self.provider.dimension();
        let mut merged = EmbeddingBatch {
            vectors: Vec::with_capacity(texts.len()),
            total_tokens: 0,
        };
        for (sub_batch, batch) in texts.chunks(self.batch_size).zip(batches) {
            if batch.vectors.len() != sub_batch.len() {
                return Err(EmbeddingError::Generation(format!(
                    "Provider returned {} embeddings for {} inputs",
                    batch.vectors.len(),
                    sub_batch.len()
                ))
                .into());
            }
            for vector in &batch.vectors {
                if vector.len() != expected_dim {
                    return Err(LitragError::DimensionMismatch {
                        expected: expected_dim,
                        actual: vector.len(),
                    });
                }
            }
            merged.total_tokens += batch.total_tokens;
            merged.vectors.extend(batch.vectors);
        }

        tracing::debug!(
            model = %self.provider.model_name(),
            texts = texts.len(),
            tokens = merged.total_tokens,
            "Embedded batch"
        );

        Ok(merged)
    }
}

/// Outcome of an embed_chunks call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedChunksOutput {
    /// Chunks that were missing an embedding and received one
    pub embedded: usize,
    pub tokens: u64,
}

/// Fill in embeddings for chunks that do not have one yet.
///
/// Chunks that already carry an embedding are left untouched and never sent to the
/// provider, so repeated calls over a stable corpus make no provider calls at all.
pub async fn embed_chunks(
    chunks: &mut [TextChunk],
    client: &EmbeddingClient,
) -> Result<EmbedChunksOutput, LitragError> {
    let missing: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_none())
        .map(|(i, _)| i)
        .collect();

    if missing.is_empty() {
        return Ok(EmbedChunksOutput::default());
    }

    let texts: Vec<String> = missing.iter().map(|&i| chunks[i].text.clone()).collect();
    let batch = client.embed_batch(&texts).await?;

    for (&i, vector) in missing.iter().zip(batch.vectors) {
        chunks[i].embedding = Some(vector);
    }

    tracing::info!(
        embedded = missing.len(),
        tokens = batch.total_tokens,
        "Embedded chunks lacking vectors"
    );

    Ok(EmbedChunksOutput {
        embedded: missing.len(),
        tokens: batch.total_tokens,
    })
}
