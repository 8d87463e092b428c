//! USD pricing for judge calls.
//!
//! Rates are per 1 000 tokens, keyed by `provider/model`. Unknown pairs
//! cost nothing — pricing gaps must never fail an eval. Input and output
//! contributions are computed independently to keep float drift bounded.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Per-1k-token USD rates for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Thread-safe pricing table with operator overrides.
pub struct CostCalculator {
    table: RwLock<HashMap<String, Pricing>>,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl CostCalculator {
    /// Create a calculator with the built-in default table.
    pub fn new() -> Self {
        let mut table = HashMap::new();
        for (provider, model, input, output) in [
            ("openai", "gpt-4o", 0.0025, 0.01),
            ("openai", "gpt-4o-mini", 0.000_15, 0.000_6),
            ("anthropic", "claude-sonnet-4-5", 0.003, 0.015),
            ("anthropic", "claude-haiku-4-5", 0.001, 0.005),
        ] {
            table.insert(key(provider, model), Pricing {
                input_per_1k: input,
                output_per_1k: output,
            });
        }
        Self {
            table: RwLock::new(table),
        }
    }

    /// Add or override the rates for `(provider, model)`.
    pub fn register_pricing(&self, provider: &str, model: &str, pricing: Pricing) {
        self.table.write().insert(key(provider, model), pricing);
    }

    /// USD cost of a call. Unknown `(provider, model)` pairs cost `0.0`.
    pub fn calculate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        let table = self.table.read();
        let Some(pricing) = table.get(&key(provider, model)) else {
            return 0.0;
        };
        let input_cost = input_tokens as f64 / 1000.0 * pricing.input_per_1k;
        let output_cost = output_tokens as f64 / 1000.0 * pricing.output_per_1k;
        input_cost + output_cost
    }
}

fn key(provider: &str, model: &str) -> String {
    format!("{provider}/{model}")
}
