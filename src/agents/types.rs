//! Core types for the phase state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::{CapabilityTier, OperationKind};
use crate::llm::ReportDraft;
use crate::session::SessionUpdate;

/// One step of an investigation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    ContextGathering,
    HypothesisGeneration,
    SearchPlanning,
    Enrichment,
    Validation,
    Finalization,
}

impl PhaseType {
    /// The fixed phase order.
    pub const SEQUENCE: [PhaseType; 6] = [
        Self::ContextGathering,
        Self::HypothesisGeneration,
        Self::SearchPlanning,
        Self::Enrichment,
        Self::Validation,
        Self::Finalization,
    ];

    /// The phase after this one, `None` after finalization.
    pub fn next(&self) -> Option<PhaseType> {
        let idx = Self::SEQUENCE.iter().position(|p| p == self)?;
        Self::SEQUENCE.get(idx + 1).copied()
    }

    /// Resource category charged for this phase's calls.
    pub fn operation_kind(&self) -> OperationKind {
        match self {
            Self::ContextGathering => OperationKind::ContextLookup,
            Self::HypothesisGeneration => OperationKind::PatternDiscovery,
            Self::SearchPlanning => OperationKind::Search,
            Self::Enrichment => OperationKind::Enrichment,
            Self::Validation => OperationKind::Validation,
            Self::Finalization => OperationKind::Synthesis,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextGathering => "context_gathering",
            Self::HypothesisGeneration => "hypothesis_generation",
            Self::SearchPlanning => "search_planning",
            Self::Enrichment => "enrichment",
            Self::Validation => "validation",
            Self::Finalization => "finalization",
        }
    }
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one phase.
///
/// # Invariants
/// - `tool_calls`, `tokens` and `cost_usd` have already been reported to the
///   budget tracker when the result is returned
/// - `next_phase`, when set, is only honoured if it lies ahead of `phase`
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: PhaseType,
    pub tier: CapabilityTier,
    pub tool_calls: u32,
    pub tokens: u64,
    pub cost_usd: f64,
    pub duration: Duration,
    /// Partial state update to merge
    pub update: SessionUpdate,
    /// Investigation complete; assemble the result now
    pub complete: bool,
    /// Forward jump directive
    pub next_phase: Option<PhaseType>,
    /// Validation wants another batch
    pub needs_more: bool,
    /// Model text worth streaming to the caller
    pub reasoning: Option<String>,
    /// Synthesis draft, set by finalization
    pub draft: Option<ReportDraft>,
}

impl PhaseResult {
    /// Empty result for `phase` at `tier`.
    pub fn new(phase: PhaseType, tier: CapabilityTier) -> Self {
        Self {
            phase,
            tier,
            tool_calls: 0,
            tokens: 0,
            cost_usd: 0.0,
            duration: Duration::ZERO,
            update: SessionUpdate::default(),
            complete: false,
            next_phase: None,
            needs_more: false,
            reasoning: None,
            draft: None,
        }
    }

    pub fn with_update(mut self, update: SessionUpdate) -> Self {
        self.update = update;
        self
    }

    pub fn completed(mut self) -> Self {
        self.complete = true;
        self
    }

    pub fn jump_to(mut self, phase: PhaseType) -> Self {
        self.next_phase = Some(phase);
        self
    }
}

/// Why a run stopped early and went straight to finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ForcedReason {
    /// One or more caps reached
    BudgetExceeded { fields: Vec<String> },
    /// Run deadline passed
    Deadline,
    /// Caller cancelled the run
    Cancelled,
    /// The mode selector advised giving up on agentic investigation
    FallbackAdvised,
}

impl ForcedReason {
    /// Whether a single synthesis call may still be attempted.
    ///
    /// Exhausted tool calls, tokens or run duration leave nothing to spend;
    /// cancellation and fallback advice stop the run outright.
    pub fn permits_synthesis(&self) -> bool {
        match self {
            Self::BudgetExceeded { fields } => !fields
                .iter()
                .any(|f| matches!(f.as_str(), "tool_calls" | "reasoning_tokens" | "duration")),
            Self::Deadline => true,
            Self::Cancelled | Self::FallbackAdvised => false,
        }
    }
}

impl std::fmt::Display for ForcedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExceeded { fields } => write!(f, "budget exceeded: {}", fields.join(", ")),
            Self::Deadline => write!(f, "run deadline passed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::FallbackAdvised => write!(f, "fallback advised"),
        }
    }
}

/// Run-level failure raised by a phase. Phase-local problems go to the
/// session error log instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhaseError {
    #[error("Phase {phase} failed: {message}")]
    Unrecoverable { phase: PhaseType, message: String },
}

impl PhaseError {
    pub fn unrecoverable(phase: PhaseType, message: impl Into<String>) -> Self {
        Self::Unrecoverable {
            phase,
            message: message.into(),
        }
    }

    pub fn phase(&self) -> PhaseType {
        match self {
            Self::Unrecoverable { phase, .. } => *phase,
        }
    }
}
