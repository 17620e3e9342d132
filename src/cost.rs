//! Cost model: per-model pricing tiers, token usage, and cost records.
//!
//! Anthropic prices four token classes separately — regular input,
//! cache-write input, cache-read input, and output — so a usage record
//! carries all four counts and cost is the sum of the four products.
//! Rates are expressed in USD per million tokens.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{MuninError, Result};

/// Per-million-token rates for one model, by pricing tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Regular input tokens, USD per million.
    pub input: f64,
    /// Prompt-cache write tokens, USD per million.
    pub cache_write: f64,
    /// Prompt-cache read tokens, USD per million.
    pub cache_read: f64,
    /// Output tokens, USD per million.
    pub output: f64,
}

/// Static description of a known model: pricing plus generation bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub pricing: ModelPricing,
    /// Hard cap on output tokens the provider accepts for this model.
    pub max_output_tokens: u32,
    pub context_window: u32,
}

/// Token usage for one completion, as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

impl TokenUsage {
    /// Total tokens across all tiers.
    pub fn total(&self) -> u32 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }
}

/// A priced usage record. Derived from usage + pricing, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub usage: TokenUsage,
    /// Total cost in USD.
    pub total_cost: f64,
}

impl CostRecord {
    /// Price a usage record with the four-tier model rates.
    pub fn compute(usage: TokenUsage, pricing: &ModelPricing) -> Self {
        const MILLION: f64 = 1_000_000.0;
        let total_cost = f64::from(usage.input_tokens) / MILLION * pricing.input
            + f64::from(usage.cache_creation_input_tokens) / MILLION * pricing.cache_write
            + f64::from(usage.cache_read_input_tokens) / MILLION * pricing.cache_read
            + f64::from(usage.output_tokens) / MILLION * pricing.output;
        Self { usage, total_cost }
    }
}

/// Rough pre-call cost estimate for response metadata.
///
/// Assumes the whole input is billed at the regular tier and the full
/// output budget is used — an upper bound, not an invoice.
pub fn estimate_cost(input_tokens: u32, max_output_tokens: u32, pricing: &ModelPricing) -> f64 {
    const MILLION: f64 = 1_000_000.0;
    f64::from(input_tokens) / MILLION * pricing.input
        + f64::from(max_output_tokens) / MILLION * pricing.output
}

/// Table of known models.
///
/// The gateway validates requested model ids against this table and
/// uses its bounds and rates; an unknown id fails before any provider
/// call is made.
#[derive(Debug, Clone)]
pub struct ModelTable {
    entries: HashMap<String, ModelSpec>,
}

impl ModelTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Table pre-populated with the Claude models munin targets.
    pub fn with_known_models() -> Self {
        let mut table = Self::new();
        table.insert(ModelSpec {
            id: "claude-3-5-sonnet-20241022".to_string(),
            pricing: ModelPricing {
                input: 3.00,
                cache_write: 3.75,
                cache_read: 0.30,
                output: 15.00,
            },
            max_output_tokens: 8192,
            context_window: 200_000,
        });
        table.insert(ModelSpec {
            id: "claude-3-5-haiku-20241022".to_string(),
            pricing: ModelPricing {
                input: 0.80,
                cache_write: 1.00,
                cache_read: 0.08,
                output: 4.00,
            },
            max_output_tokens: 8192,
            context_window: 200_000,
        });
        table.insert(ModelSpec {
            id: "claude-3-haiku-20240307".to_string(),
            pricing: ModelPricing {
                input: 0.25,
                cache_write: 0.30,
                cache_read: 0.03,
                output: 1.25,
            },
            max_output_tokens: 4096,
            context_window: 200_000,
        });
        table
    }

    /// Insert a model spec, replacing any existing entry with the same id.
    pub fn insert(&mut self, spec: ModelSpec) {
        self.entries.insert(spec.id.clone(), spec);
    }

    /// Look up a model spec by id.
    pub fn get(&self, model: &str) -> Result<&ModelSpec> {
        self.entries
            .get(model)
            .ok_or_else(|| MuninError::ModelNotFound(model.to_string()))
    }

    /// Whether a model id is known.
    pub fn contains(&self, model: &str) -> bool {
        self.entries.contains_key(model)
    }
}

impl Default for ModelTable {
    fn default() -> Self {
        Self::with_known_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet_pricing() -> ModelPricing {
        ModelPricing {
            input: 3.00,
            cache_write: 3.75,
            cache_read: 0.30,
            output: 15.00,
        }
    }

    #[test]
    fn cost_regular_tiers_only() {
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        };
        let record = CostRecord::compute(usage, &sonnet_pricing());
        let expected = 1000.0 / 1e6 * 3.0 + 500.0 / 1e6 * 15.0;
        assert!((record.total_cost - expected).abs() < 1e-12);
    }

    #[test]
    fn cost_all_four_tiers() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 200,
            cache_creation_input_tokens: 300,
            cache_read_input_tokens: 400,
        };
        let record = CostRecord::compute(usage, &sonnet_pricing());
        let expected = 100.0 / 1e6 * 3.0
            + 300.0 / 1e6 * 3.75
            + 400.0 / 1e6 * 0.30
            + 200.0 / 1e6 * 15.0;
        assert!((record.total_cost - expected).abs() < 1e-12);
        assert_eq!(record.usage.total(), 1000);
    }

    #[test]
    fn cache_read_is_cheaper_than_regular_input() {
        let pricing = sonnet_pricing();
        let cold = CostRecord::compute(
            TokenUsage {
                input_tokens: 10_000,
                ..Default::default()
            },
            &pricing,
        );
        let warm = CostRecord::compute(
            TokenUsage {
                cache_read_input_tokens: 10_000,
                ..Default::default()
            },
            &pricing,
        );
        assert!(warm.total_cost < cold.total_cost / 5.0);
    }

    #[test]
    fn estimate_is_upper_bound_flavoured() {
        let pricing = sonnet_pricing();
        let estimate = estimate_cost(1000, 500, &pricing);
        let expected = 1000.0 / 1e6 * 3.0 + 500.0 / 1e6 * 15.0;
        assert!((estimate - expected).abs() < 1e-12);
    }

    #[test]
    fn model_table_lookup() {
        let table = ModelTable::with_known_models();
        let spec = table.get("claude-3-5-sonnet-20241022").unwrap();
        assert_eq!(spec.max_output_tokens, 8192);
        assert!((spec.pricing.output - 15.0).abs() < f64::EPSILON);

        assert!(matches!(
            table.get("gpt-oops"),
            Err(MuninError::ModelNotFound(_))
        ));
    }
}
