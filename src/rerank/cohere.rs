/// Cohere-compatible rerank provider
///
/// POSTs {model, query, documents, top_n, return_documents: false} to {base_url}/rerank
/// and reads back {results: [{index, relevance_score}]}.
/// Requires LITRAG_RERANK__API_KEY (or COHERE_API_KEY) or rerank.api_key in config.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{RerankError, RerankProvider, RerankScore};
use crate::config::RerankConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankScore>,
}

/// Cohere-backed rerank provider. base_url is configurable for compatible endpoints.
pub struct CohereRerankProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl CohereRerankProvider {
    /// Create a provider from the rerank config section.
    ///
    /// # Errors
    /// Returns `RerankError::NotConfigured` if no API key is configured.
    pub fn new(config: &RerankConfig) -> Result<Self, RerankError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RerankError::NotConfigured("rerank.api_key is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RerankError::NotConfigured(format!("Failed to build HTTP client: {}", e)))?;

        Ok(CohereRerankProvider {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl RerankProvider for CohereRerankProvider {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankScore>, RerankError> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
            return_documents: false,
        };

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| RerankError::Request(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RerankError::Api { status, message: body });
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| RerankError::Request(format!("Failed to parse rerank response: {}", e)))?;

        Ok(parsed.results)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
