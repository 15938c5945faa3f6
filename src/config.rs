/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: litrag.toml (in working directory)
/// 3. Environment variables: prefixed LITRAG_, `__` separates sections
///    (e.g., LITRAG_LOG_LEVEL=debug, LITRAG_EMBEDDING__API_KEY=sk-...)
///
/// Provider keys additionally fall back to the conventional OPENAI_API_KEY and
/// COHERE_API_KEY variables when the namespaced ones are unset.

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::cache::MAX_TTL_HOURS;
use crate::errors::LitragError;
use crate::routing::ModelConfig;
use crate::search::hybrid::RetrievalConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    /// Pipeline defaults used when a caller does not supply its own RetrievalConfig.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Model registry override. None means the built-in table.
    #[serde(default)]
    pub models: Option<Vec<ModelConfig>>,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Bearer token for the embeddings API. Required whenever dense retrieval runs.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    /// Texts per provider call. Values above 100 are clamped.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

/// Rerank provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Absent key means the local heuristic reranker is used.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_rerank_base_url")]
    pub base_url: String,

    #[serde(default = "default_rerank_model")]
    pub model: String,
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path. Supports sqlite:// URI scheme.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    #[serde(default = "default_max_entries_per_user")]
    pub max_entries_per_user: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_embedding_batch_size() -> usize {
    100
}

fn default_rerank_base_url() -> String {
    "https://api.cohere.com/v1".to_string()
}

fn default_rerank_model() -> String {
    "rerank-english-v3.0".to_string()
}

fn default_db_path() -> String {
    "sqlite://litrag.db".to_string()
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_max_entries_per_user() -> usize {
    100
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            api_key: None,
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        RerankConfig {
            api_key: None,
            base_url: default_rerank_base_url(),
            model: default_rerank_model(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            db_path: default_db_path(),
            ttl_hours: default_ttl_hours(),
            max_entries_per_user: default_max_entries_per_user(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            models: None,
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: LITRAG_LOG_LEVEL=debug overrides log_level in litrag.toml
    pub fn load() -> Result<Config, LitragError> {
        let mut config: Config = Self::figment()
            .extract()
            .map_err(|e| LitragError::Config(format!("Failed to load config: {}", e)))?;

        if config.embedding.api_key.is_none() {
            config.embedding.api_key = non_empty_env("OPENAI_API_KEY");
        }
        if config.rerank.api_key.is_none() {
            config.rerank.api_key = non_empty_env("COHERE_API_KEY");
        }

        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("litrag.toml"))
            .merge(Env::prefixed("LITRAG_").split("__"))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), LitragError> {
        if self.embedding.dimensions == 0 {
            return Err(LitragError::validation("embedding.dimensions", "must be greater than zero"));
        }
        if self.embedding.batch_size == 0 {
            return Err(LitragError::validation("embedding.batch_size", "must be greater than zero"));
        }
        if self.cache.ttl_hours <= 0 {
            return Err(LitragError::validation("cache.ttl_hours", "must be greater than zero"));
        }
        if self.cache.ttl_hours > MAX_TTL_HOURS {
            return Err(LitragError::validation(
                "cache.ttl_hours",
                &format!("must be at most {} (100 years)", MAX_TTL_HOURS),
            ));
        }
        if let Some(models) = &self.models {
            if models.is_empty() {
                return Err(LitragError::validation("models", "registry override cannot be empty"));
            }
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.cache.db_path, "sqlite://litrag.db");
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.cache.max_entries_per_user, 100);
        assert_eq!(config.retrieval.top_k, 20);
        assert_eq!(config.retrieval.rerank_top_k, 10);
        assert!(config.models.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "litrag.toml",
                r#"
                log_level = "debug"

                [retrieval]
                bm25_weight = 0.7
                rerank_top_k = 5

                [rerank]
                model = "rerank-v3.5"
                "#,
            )?;
            jail.set_env("LITRAG_LOG_LEVEL", "warn");
            jail.set_env("LITRAG_EMBEDDING__API_KEY", "sk-test");

            let config: Config = Config::figment().extract()?;
            assert_eq!(config.log_level, "warn");
            assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
            assert_eq!(config.rerank.model, "rerank-v3.5");
            assert!((config.retrieval.bm25_weight - 0.7).abs() < 1e-12);
            assert_eq!(config.retrieval.rerank_top_k, 5);
            // Untouched fields keep their defaults
            assert_eq!(config.retrieval.top_k, 20);
            Ok(())
        });
    }

    #[test]
    fn test_models_override_from_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "litrag.toml",
                r#"
                [[models]]
                id = "small"
                provider = "local"
                tier = "economy"
                input_cost_per_1m = 0.1
                output_cost_per_1m = 0.2
                max_context_tokens = 32000

                [[models]]
                id = "large"
                provider = "local"
                tier = "standard"
                input_cost_per_1m = 1.0
                output_cost_per_1m = 2.0
                max_context_tokens = 128000
                "#,
            )?;

            let config: Config = Config::figment().extract()?;
            let models = config.models.expect("override should load");
            assert_eq!(models.len(), 2);
            assert_eq!(models[1].tier, crate::routing::ModelTier::Standard);
            assert!(crate::routing::ModelRegistry::new(models).is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = Config::default();
        config.cache.ttl_hours = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be greater than zero"));
    }

    #[test]
    fn test_validate_rejects_huge_ttl() {
        let mut config = Config::default();
        config.cache.ttl_hours = MAX_TTL_HOURS;
        assert!(config.validate().is_ok());

        config.cache.ttl_hours = 3_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be at most"));
    }
}
