/// Cost-aware generation model selection.
///
/// Classifies the query with two regex families (simple lookups vs. reasoning requests),
/// estimates input and output tokens, and picks the cheapest adequate model from an
/// immutable registry. Token counts use a flat 4-characters-per-token approximation,
/// not any provider's tokenizer.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::LitragError;

/// Fixed system-prompt overhead added to every input estimate.
pub const SYSTEM_PROMPT_TOKENS: u64 = 500;
pub const CHARS_PER_TOKEN: u64 = 4;

const SIMPLE_CONTEXT_LIMIT: u64 = 2_000;
const LONG_CONTEXT_THRESHOLD: u64 = 50_000;

const DEFAULT_OUTPUT_TOKENS: u64 = 200;
const REASONING_OUTPUT_TOKENS: u64 = 800;
const DETAILED_OUTPUT_TOKENS: u64 = 1_200;

/// Price/capability tier of a generation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Economy => write!(f, "economy"),
            ModelTier::Standard => write!(f, "standard"),
            ModelTier::Premium => write!(f, "premium"),
        }
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "economy" => Ok(ModelTier::Economy),
            "standard" => Ok(ModelTier::Standard),
            "premium" => Ok(ModelTier::Premium),
            other => Err(format!("Unknown model tier: {}", other)),
        }
    }
}

/// A selectable generation model. Costs are USD per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub provider: String,
    pub tier: ModelTier,
    pub input_cost_per_1m: f64,
    pub output_cost_per_1m: f64,
    pub max_context_tokens: u64,
}

impl ModelConfig {
    fn new(
        id: &str,
        provider: &str,
        tier: ModelTier,
        input_cost_per_1m: f64,
        output_cost_per_1m: f64,
        max_context_tokens: u64,
    ) -> Self {
        ModelConfig {
            id: id.to_string(),
            provider: provider.to_string(),
            tier,
            input_cost_per_1m,
            output_cost_per_1m,
            max_context_tokens,
        }
    }

    /// Estimated USD cost of one call.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1e6) * self.input_cost_per_1m
            + (output_tokens as f64 / 1e6) * self.output_cost_per_1m
    }
}

/// Immutable, ordered model table. Iteration order decides ties.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelConfig>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        ModelRegistry {
            models: builtin_models(),
        }
    }
}

fn builtin_models() -> Vec<ModelConfig> {
    use ModelTier::*;
    vec![
        ModelConfig::new("gpt-4o-mini", "openai", Economy, 0.15, 0.60, 128_000),
        ModelConfig::new("gemini-1.5-flash", "google", Economy, 0.075, 0.30, 1_048_576),
        ModelConfig::new("claude-3-haiku", "anthropic", Economy, 0.25, 1.25, 200_000),
        ModelConfig::new("gpt-4o", "openai", Standard, 2.50, 10.00, 128_000),
        ModelConfig::new("claude-3-5-sonnet", "anthropic", Standard, 3.00, 15.00, 200_000),
        ModelConfig::new("claude-3-opus", "anthropic", Premium, 15.00, 75.00, 200_000),
        ModelConfig::new("o1", "openai", Premium, 15.00, 60.00, 200_000),
    ]
}

impl ModelRegistry {
    /// Build a registry from an explicit table (e.g. the `models` config section).
    ///
    /// The heuristics need at least one economy and one standard model.
    pub fn new(models: Vec<ModelConfig>) -> Result<Self, LitragError> {
        for tier in [ModelTier::Economy, ModelTier::Standard] {
            if !models.iter().any(|m| m.tier == tier) {
                return Err(LitragError::validation(
                    "models",
                    &format!("registry needs at least one {} model", tier),
                ));
            }
        }
        Ok(ModelRegistry { models })
    }

    pub fn models(&self) -> &[ModelConfig] {
        &self.models
    }

    /// First model of `tier` in registry order.
    pub fn first_of_tier(&self, tier: ModelTier) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.tier == tier)
    }

    /// Model of `tier` with the largest context window; earliest wins on ties.
    pub fn largest_context_of_tier(&self, tier: ModelTier) -> Option<&ModelConfig> {
        self.models
            .iter()
            .filter(|m| m.tier == tier)
            .fold(None, |best: Option<&ModelConfig>, m| match best {
                Some(b) if b.max_context_tokens >= m.max_context_tokens => Some(b),
                _ => Some(m),
            })
    }

    /// Choose a generation model for `query` over `context_chars` characters of context.
    ///
    /// A preferred tier that exists in the registry short-circuits the heuristics.
    pub fn select_model(
        &self,
        query: &str,
        context_chars: usize,
        preferred_tier: Option<ModelTier>,
    ) -> ModelSelection {
        let profile = QueryProfile::classify(query);
        let context_tokens = estimate_tokens(context_chars);
        let input_tokens = SYSTEM_PROMPT_TOKENS + estimate_tokens(query.chars().count()) + context_tokens;
        let output_tokens = profile.output_tokens;

        let preferred = preferred_tier.and_then(|tier| self.first_of_tier(tier).map(|m| (tier, m)));

        let (model, reason) = if let Some((tier, model)) = preferred {
            (model, format!("preferred tier: {}", tier))
        } else if profile.simple && context_tokens < SIMPLE_CONTEXT_LIMIT {
            (self.economy(), "simple query, short context".to_string())
        } else if context_tokens > LONG_CONTEXT_THRESHOLD {
            let model = self
                .largest_context_of_tier(ModelTier::Economy)
                .unwrap_or_else(|| self.economy());
            (model, "long context".to_string())
        } else if profile.reasoning {
            let model = self
                .first_of_tier(ModelTier::Standard)
                .unwrap_or_else(|| self.economy());
            (model, "reasoning required".to_string())
        } else {
            (self.economy(), "default cost efficiency".to_string())
        };

        let estimated_cost = model.estimate_cost(input_tokens, output_tokens);

        tracing::debug!(
            model = %model.id,
            tier = %model.tier,
            reason = %reason,
            input_tokens,
            output_tokens,
            estimated_cost,
            "Selected generation model"
        );

        ModelSelection {
            model: model.clone(),
            reason,
            estimated_cost,
            input_tokens,
            output_tokens,
        }
    }

    /// Default pick. `new` guarantees an economy model; a hand-built empty registry
    /// cannot exist, so the first entry is a safe last resort.
    fn economy(&self) -> &ModelConfig {
        self.first_of_tier(ModelTier::Economy)
            .unwrap_or(&self.models[0])
    }
}

/// Result of select_model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSelection {
    pub model: ModelConfig,
    pub reason: String,
    /// USD
    pub estimated_cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Heuristic classification of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryProfile {
    pub simple: bool,
    pub reasoning: bool,
    pub output_tokens: u64,
}

fn simple_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(what is|who is|when did|where is|define|list|name|how many)")
            .expect("static regex")
    })
}

fn reasoning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(compare|contrast|analyze|evaluate|explain why|implications|relate to|synthesize|critique|argue)",
        )
        .expect("static regex")
    })
}

fn detail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(detail|comprehensive)").expect("static regex"))
}

impl QueryProfile {
    pub fn classify(query: &str) -> Self {
        let query = query.trim_start();
        let simple = simple_re().is_match(query);
        let reasoning = reasoning_re().is_match(query);

        let output_tokens = if reasoning && detail_re().is_match(query) {
            DETAILED_OUTPUT_TOKENS
        } else if reasoning {
            REASONING_OUTPUT_TOKENS
        } else {
            DEFAULT_OUTPUT_TOKENS
        };

        QueryProfile {
            simple,
            reasoning,
            output_tokens,
        }
    }
}

/// ceil(chars / 4)
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(CHARS_PER_TOKEN)
}
