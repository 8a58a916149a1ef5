//! Mode-selection inputs and outputs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::performance::ModePerformance;

/// How an investigation is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationMode {
    /// Bounded multi-phase investigation driven by reasoning backends
    Agentic,
    /// Fixed, cheaper pipeline with no reasoning backend
    Deterministic,
}

impl InvestigationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agentic => "agentic",
            Self::Deterministic => "deterministic",
        }
    }
}

impl std::fmt::Display for InvestigationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InvestigationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "agentic" => Ok(Self::Agentic),
            "deterministic" => Ok(Self::Deterministic),
            other => Err(format!("unknown investigation mode: {}", other)),
        }
    }
}

/// Signals gathered before a run, used to pick a mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSelectionFactors {
    /// The subject is a statistical outlier against its baseline
    pub has_anomaly: bool,
    /// Comparable content is dense enough to mine patterns from
    pub has_pattern_density: bool,
    /// Competitor data is available for the niche
    pub has_competitive_data: bool,
    /// Semantic search returns well-separated neighbours
    pub has_semantic_density: bool,
    /// Explicit caller choice, obeyed unconditionally
    pub user_preference: Option<InvestigationMode>,
    /// Recent agentic failures for this caller or subject
    pub prior_failures: u32,
    /// Reasoning quota is available
    pub quota_available: bool,
    /// Caller deadline
    #[serde(with = "crate::util::option_duration_millis")]
    pub time_constraint: Option<Duration>,
}

/// Outcome of mode selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSelectionResult {
    pub mode: InvestigationMode,
    /// In `[0, 1]`
    pub confidence: f64,
    /// One entry per rule that fired, in evaluation order
    pub reasoning: Vec<String>,
    /// Agentic was chosen with low confidence
    pub fallback_recommended: bool,
    pub agentic_score: u32,
    pub deterministic_score: u32,
    /// Expected spend of the chosen mode, from its learned average
    pub estimated_cost_usd: f64,
    /// Expected wall-clock time of the chosen mode, from its learned average
    pub estimated_duration_ms: u64,
}

impl ModeSelectionResult {
    pub(crate) fn decided(perf: &ModePerformance, reason: impl Into<String>) -> Self {
        Self {
            mode: perf.mode,
            confidence: 1.0,
            reasoning: vec![reason.into()],
            fallback_recommended: false,
            agentic_score: 0,
            deterministic_score: 0,
            estimated_cost_usd: perf.avg_cost_usd,
            estimated_duration_ms: perf.avg_duration_ms.max(0.0) as u64,
        }
    }
}
