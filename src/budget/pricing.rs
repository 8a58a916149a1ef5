//! Capability tiers and their pricing.
//!
//! Reasoning backends come in three strengths. Each tier has a context
//! window and a per-1K-token price; the router trades one against the other.
//!
//! Prices are kept in nanodollars per 1K tokens to avoid floating-point drift
//! when many small calls are summed.

use serde::{Deserialize, Serialize};

/// Ordered reasoning-backend strength. `Low < Mid < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTier {
    Low,
    Mid,
    High,
}

impl CapabilityTier {
    /// All tiers from smallest to largest.
    pub const ALL: [CapabilityTier; 3] = [Self::Low, Self::Mid, Self::High];

    /// Static profile for this tier.
    pub fn profile(&self) -> TierProfile {
        match self {
            // Haiku-class: $0.80/1M input, $4/1M output
            Self::Low => TierProfile {
                tier: *self,
                context_window: 32_000,
                input_nano_per_1k: 800_000,
                output_nano_per_1k: 4_000_000,
            },
            // Sonnet-class: $3/1M input, $15/1M output
            Self::Mid => TierProfile {
                tier: *self,
                context_window: 128_000,
                input_nano_per_1k: 3_000_000,
                output_nano_per_1k: 15_000_000,
            },
            // Opus-class: $15/1M input, $75/1M output
            Self::High => TierProfile {
                tier: *self,
                context_window: 200_000,
                input_nano_per_1k: 15_000_000,
                output_nano_per_1k: 75_000_000,
            },
        }
    }

    /// Context window in tokens.
    pub fn context_window(&self) -> u64 {
        self.profile().context_window
    }

    /// One step down, saturating at `Low`.
    pub fn downgrade(&self) -> Self {
        match self {
            Self::High => Self::Mid,
            Self::Mid | Self::Low => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context window and price for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierProfile {
    pub tier: CapabilityTier,
    /// Maximum tokens the backend accepts in one request
    pub context_window: u64,
    /// Cost per 1K input tokens in nanodollars
    pub input_nano_per_1k: u64,
    /// Cost per 1K output tokens in nanodollars
    pub output_nano_per_1k: u64,
}

impl TierProfile {
    /// Estimated cost in USD for a call.
    ///
    /// # Formula
    /// `(input/1000 * input_rate + output/1000 * output_rate) / 1e9`
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let nano = input_tokens.saturating_mul(self.input_nano_per_1k) / 1_000
            + output_tokens.saturating_mul(self.output_nano_per_1k) / 1_000;
        nano as f64 / 1_000_000_000.0
    }

    /// Cost of a call whose split between input and output is unknown.
    ///
    /// Investigation prompts are input-heavy; assume 3:1.
    pub fn blended_cost_usd(&self, total_tokens: u64) -> f64 {
        let output = total_tokens / 4;
        self.cost_usd(total_tokens - output, output)
    }

    /// Half the context window: the most session state a tier should carry.
    pub fn state_budget(&self) -> u64 {
        self.context_window / 2
    }
}
