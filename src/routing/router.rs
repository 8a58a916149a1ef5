//! Capability router: assigns each phase to a reasoning tier.
//!
//! # Algorithm
//! 1. Phase preference: hypothesis and finalization want `High`, search
//!    planning and validation want `Mid`, data gathering wants `Low`
//! 2. Budget pressure: above the high-pressure line `High` is unavailable,
//!    above the critical line everything runs on `Low`
//! 3. State size: if the estimated state exceeds half the tier's context
//!    window, upgrade to the smallest tier that fits
//! 4. Cost estimate from the tier's per-1K pricing
//!
//! # Design for Provability
//! Routing never fails. Estimation constants are heuristics and are only
//! tested for monotonicity.

use serde::{Deserialize, Serialize};

use crate::agents::PhaseType;
use crate::budget::{BudgetSnapshot, CapabilityTier};
use crate::session::SessionState;

/// Tunables of the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Nominal per-run spend against which cost pressure is measured
    pub cost_ceiling_usd: f64,
    /// Above this pressure the high tier is not used
    pub high_pressure: f64,
    /// Above this pressure only the low tier is used
    pub critical_pressure: f64,
    /// Hypothesis confidence above which validation stays on the mid tier
    pub validation_confidence_threshold: f64,
    /// Estimated tokens each logged tool call adds to the state
    pub tokens_per_tool_call: u64,
    /// Estimated tokens each held candidate adds to the state
    pub tokens_per_candidate: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cost_ceiling_usd: 1.0,
            high_pressure: 0.6,
            critical_pressure: 0.8,
            validation_confidence_threshold: 0.8,
            tokens_per_tool_call: 50,
            tokens_per_candidate: 20,
        }
    }
}

/// Tier chosen for one phase, with its justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub tier: CapabilityTier,
    pub reason: String,
    pub estimated_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Routes phases to capability tiers and counts tier switches.
#[derive(Debug, Clone)]
pub struct CapabilityRouter {
    config: RouterConfig,
    current_tier: Option<CapabilityTier>,
    switch_count: u32,
}

impl CapabilityRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            current_tier: None,
            switch_count: 0,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Tier of the last decision, if any.
    pub fn current_tier(&self) -> Option<CapabilityTier> {
        self.current_tier
    }

    /// Number of decisions that changed the tier.
    pub fn switch_count(&self) -> u32 {
        self.switch_count
    }

    /// Choose a tier for `phase`.
    ///
    /// # Postconditions
    /// - always returns a decision
    /// - `switch_count` grows by one iff the tier differs from the previous decision
    pub fn route(
        &mut self,
        phase: PhaseType,
        state: &SessionState,
        budget: &BudgetSnapshot,
    ) -> RoutingDecision {
        let mut reasons = Vec::new();

        let preferred = self.preferred_tier(phase, state);
        reasons.push(format!("{} prefers {}", phase, preferred));

        let pressure = self.pressure(budget);
        let mut tier = self.apply_pressure(preferred, pressure);
        if tier != preferred {
            reasons.push(format!("budget pressure {:.2} caps at {}", pressure, tier));
        }

        let state_tokens = estimate_state_tokens(state, &self.config);
        if state_tokens > tier.profile().state_budget() {
            match smallest_fitting_tier(tier, state_tokens) {
                Some(bigger) => {
                    reasons.push(format!("state ~{} tokens needs {}", state_tokens, bigger));
                    tier = bigger;
                }
                None => {
                    tracing::warn!(
                        session_id = %state.session_id,
                        state_tokens,
                        "Session state exceeds every tier's state budget"
                    );
                    reasons.push(format!("state ~{} tokens fits no tier", state_tokens));
                    tier = CapabilityTier::High;
                }
            }
        }

        let estimated_tokens = phase_token_estimate(phase).saturating_add(state_tokens);
        let estimated_cost_usd = tier.profile().blended_cost_usd(estimated_tokens);

        if let Some(current) = self.current_tier {
            if current != tier {
                self.switch_count += 1;
                tracing::debug!(from = %current, to = %tier, phase = %phase, "Tier switch");
            }
        }
        self.current_tier = Some(tier);

        RoutingDecision {
            tier,
            reason: reasons.join("; "),
            estimated_tokens,
            estimated_cost_usd,
        }
    }

    fn preferred_tier(&self, phase: PhaseType, state: &SessionState) -> CapabilityTier {
        match phase {
            PhaseType::HypothesisGeneration | PhaseType::Finalization => CapabilityTier::High,
            PhaseType::SearchPlanning => CapabilityTier::Mid,
            PhaseType::Validation => match state.hypothesis_confidence() {
                Some(c) if c < self.config.validation_confidence_threshold => CapabilityTier::High,
                _ => CapabilityTier::Mid,
            },
            PhaseType::ContextGathering | PhaseType::Enrichment => CapabilityTier::Low,
        }
    }

    /// Larger of the cost fraction and the token fraction.
    fn pressure(&self, budget: &BudgetSnapshot) -> f64 {
        let cost = if self.config.cost_ceiling_usd > 0.0 {
            budget.usage.total_cost_usd / self.config.cost_ceiling_usd
        } else {
            0.0
        };
        cost.max(budget.token_fraction())
    }

    fn apply_pressure(&self, tier: CapabilityTier, pressure: f64) -> CapabilityTier {
        if pressure > self.config.critical_pressure {
            CapabilityTier::Low
        } else if pressure > self.config.high_pressure {
            tier.min(CapabilityTier::Mid)
        } else {
            tier
        }
    }
}

impl Default for CapabilityRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

/// Rough token size of the session state.
///
/// # Formula
/// `serialized_len / 4 + tool_calls * per_call + candidates * per_candidate`
pub fn estimate_state_tokens(state: &SessionState, config: &RouterConfig) -> u64 {
    let serialized = serde_json::to_string(state).map(|s| s.len()).unwrap_or(0) as u64;
    serialized / 4
        + state.tool_calls.len() as u64 * config.tokens_per_tool_call
        + state.candidate_count() as u64 * config.tokens_per_candidate
}

/// Expected tokens a phase spends beyond carrying the state.
pub fn phase_token_estimate(phase: PhaseType) -> u64 {
    match phase {
        PhaseType::ContextGathering => 500,
        PhaseType::HypothesisGeneration => 4_000,
        PhaseType::SearchPlanning => 2_000,
        PhaseType::Enrichment => 1_000,
        PhaseType::Validation => 3_000,
        PhaseType::Finalization => 5_000,
    }
}

fn smallest_fitting_tier(from: CapabilityTier, state_tokens: u64) -> Option<CapabilityTier> {
    CapabilityTier::ALL
        .iter()
        .copied()
        .filter(|t| *t >= from)
        .find(|t| t.profile().state_budget() >= state_tokens)
}
