//! Resource accounting for one investigation run.
//!
//! # Invariants
//! - Every usage counter except `duration` is monotonically non-decreasing
//!   between two calls to [`BudgetTracker::initialize`].
//! - `fanouts <= max_fanouts` and `validation_batches <= max_validation_batches`
//!   (enforced by the gated `record_*` methods).
//! - A field is "exceeded" iff `usage.field >= caps.field`; nothing else feeds
//!   into [`BudgetTracker::is_exceeded`].
//!
//! # Design for Provability
//! Fields are private; all mutation goes through methods that keep the
//! invariants. The tracker performs no I/O.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::pricing::CapabilityTier;

/// Resource category of a recorded operation, set once at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Subject metadata and other plain lookups
    ContextLookup,
    /// Reasoning that proposes a success pattern
    PatternDiscovery,
    /// Query planning and similarity search fan-out
    Search,
    /// Per-candidate enrichment lookups
    Enrichment,
    /// Batch scoring and validation verdicts
    Validation,
    /// Final report synthesis
    Synthesis,
}

impl OperationKind {
    /// Fraction of an operation's cost attributed to `(high, mid, low)` tiers.
    ///
    /// A fixed attribution policy, not a measurement.
    pub fn tier_split(&self) -> (f64, f64, f64) {
        match self {
            Self::PatternDiscovery | Self::Synthesis => (0.7, 0.2, 0.1),
            Self::Validation => (0.2, 0.6, 0.2),
            Self::ContextLookup | Self::Search | Self::Enrichment => (0.1, 0.2, 0.7),
        }
    }
}

/// Hard ceilings for one run. Immutable once the tracker is initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetCaps {
    /// Search fan-out rounds
    pub max_fanouts: u32,
    /// Validation batches
    pub max_validation_batches: u32,
    /// Candidates examined across all validation batches
    pub max_candidates: u32,
    /// Reasoning tokens across all tiers
    pub max_reasoning_tokens: u64,
    /// Wall-clock time since initialization
    #[serde(with = "crate::util::duration_secs")]
    pub max_duration: Duration,
    /// Tool and backend invocations
    pub max_tool_calls: u32,
}

impl Default for BudgetCaps {
    fn default() -> Self {
        Self {
            max_fanouts: 3,
            max_validation_batches: 5,
            max_candidates: 200,
            max_reasoning_tokens: 100_000,
            max_duration: Duration::from_secs(300),
            max_tool_calls: 60,
        }
    }
}

impl BudgetCaps {
    /// Caps that never trip (for tests and offline replays).
    pub fn unlimited() -> Self {
        Self {
            max_fanouts: u32::MAX,
            max_validation_batches: u32::MAX,
            max_candidates: u32::MAX,
            max_reasoning_tokens: u64::MAX,
            max_duration: Duration::from_secs(u64::MAX / 4),
            max_tool_calls: u32::MAX,
        }
    }
}

/// Cost attributed to each capability tier, in USD.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierCosts {
    pub high: f64,
    pub mid: f64,
    pub low: f64,
}

impl TierCosts {
    pub fn get(&self, tier: CapabilityTier) -> f64 {
        match tier {
            CapabilityTier::High => self.high,
            CapabilityTier::Mid => self.mid,
            CapabilityTier::Low => self.low,
        }
    }

    pub fn total(&self) -> f64 {
        self.high + self.mid + self.low
    }
}

/// Consumption counters mirroring [`BudgetCaps`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub fanouts: u32,
    pub validation_batches: u32,
    pub candidates_examined: u32,
    pub reasoning_tokens: u64,
    #[serde(with = "crate::util::duration_millis")]
    pub duration: Duration,
    pub tool_calls: u32,
    pub total_cost_usd: f64,
    pub cost_by_tier: TierCosts,
}

/// Clamped-to-zero headroom per cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRemaining {
    pub fanouts: u32,
    pub validation_batches: u32,
    pub candidates: u32,
    pub reasoning_tokens: u64,
    #[serde(with = "crate::util::duration_millis")]
    pub duration: Duration,
    pub tool_calls: u32,
}

/// Caps and usage read together, for components that reason about pressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub caps: BudgetCaps,
    pub usage: BudgetUsage,
}

impl BudgetSnapshot {
    /// Fraction of the reasoning-token cap consumed, in `[0, 1]`.
    pub fn token_fraction(&self) -> f64 {
        if self.caps.max_reasoning_tokens == 0 {
            return 1.0;
        }
        (self.usage.reasoning_tokens as f64 / self.caps.max_reasoning_tokens as f64).clamp(0.0, 1.0)
    }
}

/// Tracks consumption of the six bounded resources against fixed caps.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    caps: BudgetCaps,
    usage: BudgetUsage,
    started_at: Instant,
}

impl BudgetTracker {
    /// Create a tracker and start its clock.
    pub fn new(caps: BudgetCaps) -> Self {
        Self {
            caps,
            usage: BudgetUsage::default(),
            started_at: Instant::now(),
        }
    }

    /// Reset all counters and the start timestamp.
    ///
    /// # Postconditions
    /// - every usage counter is zero
    /// - `self.caps() == &caps`
    pub fn initialize(&mut self, caps: BudgetCaps) {
        self.caps = caps;
        self.usage = BudgetUsage::default();
        self.started_at = Instant::now();
    }

    pub fn caps(&self) -> &BudgetCaps {
        &self.caps
    }

    /// Current usage with `duration` recomputed from the start timestamp.
    pub fn usage(&self) -> BudgetUsage {
        let mut usage = self.usage.clone();
        usage.duration = self.started_at.elapsed();
        usage
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            caps: self.caps.clone(),
            usage: self.usage(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn refresh_duration(&mut self) {
        self.usage.duration = self.started_at.elapsed();
    }

    /// Check whether an operation may proceed.
    ///
    /// Checks, in order: duration, tool calls, tokens (only when an estimate
    /// is given), then the kind-specific ceiling. Returns `false` on the first
    /// violated ceiling; inspect [`usage`](Self::usage) to learn which one.
    pub fn can_execute(&mut self, kind: OperationKind, estimated_tokens: Option<u64>) -> bool {
        self.refresh_duration();
        let u = &self.usage;
        let c = &self.caps;

        if u.duration >= c.max_duration {
            return false;
        }
        if u.tool_calls >= c.max_tool_calls {
            return false;
        }
        if let Some(tokens) = estimated_tokens {
            if u.reasoning_tokens.saturating_add(tokens) > c.max_reasoning_tokens {
                return false;
            }
        }
        match kind {
            OperationKind::Validation => u.validation_batches < c.max_validation_batches,
            OperationKind::Search => u.fanouts < c.max_fanouts,
            _ => true,
        }
    }

    /// Record one invocation. Never refused.
    ///
    /// The cost is attributed across tiers by [`OperationKind::tier_split`].
    pub fn record_tool_call(&mut self, kind: OperationKind, tokens: u64, cost_usd: f64) {
        let cost = cost_usd.max(0.0);
        self.usage.tool_calls = self.usage.tool_calls.saturating_add(1);
        self.usage.reasoning_tokens = self.usage.reasoning_tokens.saturating_add(tokens);
        self.usage.total_cost_usd += cost;

        let (high, mid, low) = kind.tier_split();
        self.usage.cost_by_tier.high += cost * high;
        self.usage.cost_by_tier.mid += cost * mid;
        self.usage.cost_by_tier.low += cost * low;
    }

    /// Claim one validation batch covering `candidate_count` candidates.
    ///
    /// # Returns
    /// `false` without mutating anything if the batch cap is already reached.
    pub fn record_validation(&mut self, candidate_count: u32) -> bool {
        if self.usage.validation_batches >= self.caps.max_validation_batches {
            return false;
        }
        self.usage.validation_batches += 1;
        self.usage.candidates_examined = self
            .usage
            .candidates_examined
            .saturating_add(candidate_count);
        true
    }

    /// Claim one search fan-out round.
    ///
    /// # Returns
    /// `false` without mutating anything if the fan-out cap is already reached.
    pub fn record_fanout(&mut self) -> bool {
        if self.usage.fanouts >= self.caps.max_fanouts {
            return false;
        }
        self.usage.fanouts += 1;
        true
    }

    /// Authoritative "stop now" signal: any of the six fields at or over cap.
    pub fn is_exceeded(&mut self) -> bool {
        !self.exceeded_fields().is_empty()
    }

    /// Names of the caps currently reached, for logging.
    pub fn exceeded_fields(&mut self) -> Vec<&'static str> {
        self.refresh_duration();
        let u = &self.usage;
        let c = &self.caps;
        let mut fields = Vec::new();
        if u.fanouts >= c.max_fanouts {
            fields.push("fanouts");
        }
        if u.validation_batches >= c.max_validation_batches {
            fields.push("validation_batches");
        }
        if u.candidates_examined >= c.max_candidates {
            fields.push("candidates");
        }
        if u.reasoning_tokens >= c.max_reasoning_tokens {
            fields.push("reasoning_tokens");
        }
        if u.duration >= c.max_duration {
            fields.push("duration");
        }
        if u.tool_calls >= c.max_tool_calls {
            fields.push("tool_calls");
        }
        fields
    }

    /// Headroom per cap, clamped to zero.
    pub fn remaining(&self) -> BudgetRemaining {
        let u = self.usage();
        let c = &self.caps;
        BudgetRemaining {
            fanouts: c.max_fanouts.saturating_sub(u.fanouts),
            validation_batches: c.max_validation_batches.saturating_sub(u.validation_batches),
            candidates: c.max_candidates.saturating_sub(u.candidates_examined),
            reasoning_tokens: c.max_reasoning_tokens.saturating_sub(u.reasoning_tokens),
            duration: c.max_duration.saturating_sub(u.duration),
            tool_calls: c.max_tool_calls.saturating_sub(u.tool_calls),
        }
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new(BudgetCaps::default())
    }
}
