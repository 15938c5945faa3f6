/// Domain-specific error types for litrag
///
/// Retrieval either returns a (possibly degraded) result set or one of these.
/// Reranker and cache failures never surface here; they are recovered where they happen.

#[derive(Debug, thiserror::Error)]
pub enum LitragError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding provider error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Embeddings of inconsistent dimensionality reached the scorer.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for LitragError {
    fn from(e: sqlx::Error) -> Self {
        LitragError::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for LitragError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        LitragError::Storage(format!("Migration failed: {}", e))
    }
}

impl LitragError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use litrag::errors::LitragError;
    /// let err = LitragError::validation("query", "Query cannot be empty");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        LitragError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// True when the caller should report "search unavailable" rather than
    /// retrying or showing a degraded result set.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LitragError::Config(_) | LitragError::Embedding(_) | LitragError::DimensionMismatch { .. }
        )
    }
}
