//! Cost calculation for LLM calls.
//!
//! Every adapter prices calls with the same shape: USD per 1K prompt and
//! completion tokens, converted to whole cents and rounded up, with a one
//! cent floor for any priced call. Free backends are never charged.

use serde::Serialize;

use super::types::TokenUsage;

/// Smallest amount ever charged for a priced call, in cents.
pub const MIN_CHARGE_CENTS: u64 = 1;

/// Characters per token used when a provider does not report usage.
pub const CHARS_PER_TOKEN: usize = 4;

/// Per-model price list entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pricing {
    /// USD per 1K prompt tokens.
    pub input_per_k: f64,
    /// USD per 1K completion tokens.
    pub output_per_k: f64,
}

impl Pricing {
    pub const FREE: Pricing = Pricing::new(0.0, 0.0);

    pub const fn new(input_per_k: f64, output_per_k: f64) -> Self {
        Self {
            input_per_k,
            output_per_k,
        }
    }

    pub fn is_free(&self) -> bool {
        self.input_per_k <= 0.0 && self.output_per_k <= 0.0
    }

    /// Raw USD cost of `usage` before rounding.
    pub fn usd(&self, usage: &TokenUsage) -> f64 {
        (f64::from(usage.prompt) / 1000.0) * self.input_per_k
            + (f64::from(usage.completion) / 1000.0) * self.output_per_k
    }
}

/// Look `model` up in a static price list. Unknown models get `fallback`.
pub fn price_for(table: &[(&str, Pricing)], model: &str, fallback: Pricing) -> Pricing {
    table
        .iter()
        .find(|(name, _)| *name == model)
        .map_or(fallback, |(_, p)| *p)
}

/// Cost of a successful call in cents.
///
/// `ceil(max(1, usd * 100))` for priced models, `0` for free ones.
pub fn cost_cents(pricing: &Pricing, usage: &TokenUsage) -> u64 {
    if pricing.is_free() {
        return 0;
    }
    let cents = (pricing.usd(usage) * 100.0).max(MIN_CHARGE_CENTS as f64);
    cents.ceil() as u64
}

pub fn cents_to_usd(cents: u64) -> f64 {
    cents as f64 / 100.0
}

/// Estimate a token count from a character count.
pub fn estimate_tokens(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}
