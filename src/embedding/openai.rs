/// OpenAI embedding provider
///
/// Calls the OpenAI-compatible Embeddings API using reqwest.
/// Supports text-embedding-3-small (1536 dimensions) by default; the requested
/// dimensionality is sent explicitly so other models can be truncated to match.
/// Requires LITRAG_EMBEDDING__API_KEY (or OPENAI_API_KEY) or embedding.api_key in config.

use async_trait::async_trait;
use std::time::Duration;

use super::{EmbeddingBatch, EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Request body for the Embeddings API
#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

/// Response from the Embeddings API
#[derive(serde::Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
    #[serde(default)]
    usage: Option<EmbedUsage>,
}

/// Single embedding result; `index` refers to the position in the request input
#[derive(serde::Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(serde::Deserialize)]
struct EmbedUsage {
    total_tokens: u64,
}

/// OpenAI-backed embedding provider.
///
/// Requires a valid API key: validated on construction, not at embed time.
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl OpenAIEmbeddingProvider {
    /// Create a new OpenAIEmbeddingProvider from the embedding config section.
    ///
    /// # Errors
    /// Returns `EmbeddingError::NotConfigured` if no API key is configured.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                EmbeddingError::NotConfigured(
                    "An embeddings API key is required for dense retrieval. \
                     Set LITRAG_EMBEDDING__API_KEY, OPENAI_API_KEY, or embedding.api_key in litrag.toml"
                        .to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::NotConfigured(format!("Failed to build HTTP client: {}", e)))?;

        Ok(OpenAIEmbeddingProvider {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            dim: config.dimensions,
        })
    }
}

/// Reorder response items by their input index and collect token usage.
fn into_batch(response: EmbedResponse, expected: usize) -> Result<EmbeddingBatch, EmbeddingError> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        let slot = slots.get_mut(item.index).ok_or_else(|| {
            EmbeddingError::Generation(format!(
                "API returned index {} for a batch of {}",
                item.index, expected
            ))
        })?;
        *slot = Some(item.embedding);
    }

    let vectors = slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| EmbeddingError::Generation(format!("API omitted embedding for input {}", i)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EmbeddingBatch {
        vectors,
        total_tokens: response.usage.map(|u| u.total_tokens).unwrap_or(0),
    })
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbeddingError> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dim,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api {
                status,
                message: body,
            });
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("Failed to parse API response: {}", e)))?;

        into_batch(embed_response, texts.len())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
