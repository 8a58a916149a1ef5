//! Final report and terminal run result.
//!
//! The report is assembled from whatever the session holds when the run ends.
//! Every missing piece gets an explicit empty default, so a report always
//! exists for a successful run, however degraded.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::{ForcedReason, PhaseType};
use crate::budget::{BudgetUsage, CapabilityTier, TierCosts};
use crate::llm::{PatternDraft, ReportDraft};
use crate::mode::InvestigationMode;
use crate::session::{PatternSummary, SessionId, SessionState};

/// Statement used when no pattern could be identified.
pub const NO_PATTERN: &str = "No pattern identified";

/// A success pattern with its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryPattern {
    pub statement: String,
    pub confidence: f64,
    pub strength: f64,
    pub evidence: Vec<String>,
    pub niches: Vec<String>,
}

impl PrimaryPattern {
    /// Placeholder for a run that found nothing.
    pub fn empty() -> Self {
        Self {
            statement: NO_PATTERN.to_string(),
            confidence: 0.0,
            strength: 0.0,
            evidence: Vec::new(),
            niches: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statement == NO_PATTERN
    }

    fn from_summary(summary: &PatternSummary, confidence: f64, niches: &[String]) -> Self {
        Self {
            statement: summary.statement.clone(),
            confidence,
            strength: summary.strength,
            evidence: summary.evidence.clone(),
            niches: niches.to_vec(),
        }
    }
}

impl From<PatternDraft> for PrimaryPattern {
    fn from(draft: PatternDraft) -> Self {
        Self {
            statement: draft.statement,
            confidence: draft.confidence.clamp(0.0, 1.0),
            strength: draft.strength.clamp(0.0, 1.0),
            evidence: draft.evidence,
            niches: draft.niches,
        }
    }
}

/// Metrics of one executed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub phase: PhaseType,
    pub tier: CapabilityTier,
    pub tool_calls: u32,
    pub tokens: u64,
    pub cost_usd: f64,
    #[serde(with = "crate::util::duration_millis")]
    pub duration: Duration,
}

/// Resource totals and provenance of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub session_id: Option<SessionId>,
    pub mode: InvestigationMode,
    pub fallback_used: bool,
    pub phases_run: u32,
    pub tool_calls: u32,
    pub reasoning_tokens: u64,
    pub total_cost_usd: f64,
    pub cost_by_tier: TierCosts,
    pub fanouts: u32,
    pub validation_batches: u32,
    pub candidates_examined: u32,
    pub tier_switches: u32,
    #[serde(with = "crate::util::duration_millis")]
    pub duration: Duration,
    /// Set when the run was cut short
    pub forced_finalization: Option<ForcedReason>,
    /// Per-phase metrics, kept when telemetry is enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_metrics: Vec<PhaseMetrics>,
}

impl RunMetadata {
    pub fn new(mode: InvestigationMode) -> Self {
        Self {
            session_id: None,
            mode,
            fallback_used: false,
            phases_run: 0,
            tool_calls: 0,
            reasoning_tokens: 0,
            total_cost_usd: 0.0,
            cost_by_tier: TierCosts::default(),
            fanouts: 0,
            validation_batches: 0,
            candidates_examined: 0,
            tier_switches: 0,
            duration: Duration::ZERO,
            forced_finalization: None,
            phase_metrics: Vec::new(),
        }
    }

    /// Copy resource totals from budget usage.
    pub fn with_usage(mut self, usage: &BudgetUsage) -> Self {
        self.tool_calls = usage.tool_calls;
        self.reasoning_tokens = usage.reasoning_tokens;
        self.total_cost_usd = usage.total_cost_usd;
        self.cost_by_tier = usage.cost_by_tier.clone();
        self.fanouts = usage.fanouts;
        self.validation_batches = usage.validation_batches;
        self.candidates_examined = usage.candidates_examined;
        self.duration = usage.duration;
        self
    }
}

/// Outcome of an investigation, owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub subject_id: String,
    pub primary_pattern: PrimaryPattern,
    pub secondary_patterns: Vec<PrimaryPattern>,
    pub recommendations: Vec<String>,
    pub competitive_insights: Vec<String>,
    pub channel_insights: Vec<String>,
    pub metadata: RunMetadata,
}

impl FinalReport {
    /// Assemble a report from session state and an optional synthesis draft.
    ///
    /// Draft content wins where present. Otherwise the primary pattern is the
    /// strongest validated pattern, then the working hypothesis, then
    /// [`PrimaryPattern::empty`].
    pub fn from_session(state: &SessionState, draft: Option<ReportDraft>, metadata: RunMetadata) -> Self {
        let draft = draft.unwrap_or_default();
        let niches: Vec<String> = state
            .context
            .as_ref()
            .and_then(|c| c.niche.clone())
            .into_iter()
            .collect();
        let confidence = state.hypothesis_confidence().unwrap_or(0.0);
        let patterns: Vec<&PatternSummary> = state
            .validation_results
            .as_ref()
            .map(|v| v.patterns.iter().collect())
            .unwrap_or_default();

        let primary_pattern = match draft.primary_pattern {
            Some(p) if !p.statement.trim().is_empty() => PrimaryPattern::from(p),
            _ => match (patterns.first(), state.hypothesis.as_ref()) {
                (Some(top), _) => PrimaryPattern::from_summary(top, confidence, &niches),
                (None, Some(h)) => PrimaryPattern {
                    statement: h.statement.clone(),
                    confidence: h.confidence,
                    strength: 0.0,
                    evidence: h.signals.clone(),
                    niches: niches.clone(),
                },
                (None, None) => PrimaryPattern::empty(),
            },
        };

        let secondary_patterns = if draft.secondary_patterns.is_empty() {
            patterns
                .iter()
                .filter(|p| p.statement != primary_pattern.statement)
                .map(|p| PrimaryPattern::from_summary(p, confidence, &niches))
                .collect()
        } else {
            draft.secondary_patterns.into_iter().map(PrimaryPattern::from).collect()
        };

        Self {
            subject_id: state.subject_id.clone(),
            primary_pattern,
            secondary_patterns,
            recommendations: draft.recommendations,
            competitive_insights: draft.competitive_insights,
            channel_insights: draft.channel_insights,
            metadata,
        }
    }
}

/// Error code and message of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub code: String,
    pub message: String,
}

/// Terminal result of a run.
///
/// # Invariants
/// - `success` iff `report.is_some()` and `failure.is_none()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationResult {
    pub success: bool,
    pub mode_used: InvestigationMode,
    pub fallback_used: bool,
    pub primary_pattern: Option<PrimaryPattern>,
    pub report: Option<FinalReport>,
    pub usage: BudgetUsage,
    pub failure: Option<RunFailure>,
}

impl InvestigationResult {
    pub fn succeeded(report: FinalReport, usage: BudgetUsage) -> Self {
        Self {
            success: true,
            mode_used: report.metadata.mode,
            fallback_used: report.metadata.fallback_used,
            primary_pattern: Some(report.primary_pattern.clone()),
            report: Some(report),
            usage,
            failure: None,
        }
    }

    pub fn failed(
        mode_used: InvestigationMode,
        fallback_used: bool,
        code: impl Into<String>,
        message: impl Into<String>,
        usage: BudgetUsage,
    ) -> Self {
        Self {
            success: false,
            mode_used,
            fallback_used,
            primary_pattern: None,
            report: None,
            usage,
            failure: Some(RunFailure {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Hypothesis, SubjectContext, ValidationResults};

    fn pattern(statement: &str, strength: f64) -> PatternSummary {
        PatternSummary {
            statement: statement.into(),
            support: 3,
            strength,
            evidence: vec![format!("{} evidence", statement)],
        }
    }

    fn meta() -> RunMetadata {
        RunMetadata::new(InvestigationMode::Agentic)
    }

    #[test]
    fn test_empty_state_gets_explicit_defaults() {
        let state = SessionState::new(SessionId::new(), "vid");
        let report = FinalReport::from_session(&state, None, meta());

        assert!(report.primary_pattern.is_empty());
        assert_eq!(report.primary_pattern.confidence, 0.0);
        assert!(report.secondary_patterns.is_empty());
        assert!(report.recommendations.is_empty());
        assert_eq!(report.subject_id, "vid");
    }

    #[test]
    fn test_validated_pattern_preferred_over_hypothesis() {
        let mut state = SessionState::new(SessionId::new(), "vid");
        state.context = Some(SubjectContext {
            niche: Some("cooking".into()),
            ..Default::default()
        });
        state.hypothesis = Some(Hypothesis::new("hook in first 3s", 0.75));
        state.validation_results = Some(ValidationResults {
            validated: 6,
            patterns: vec![pattern("fast cuts", 0.8), pattern("bright thumbnail", 0.4)],
            ..Default::default()
        });

        let report = FinalReport::from_session(&state, None, meta());
        assert_eq!(report.primary_pattern.statement, "fast cuts");
        assert_eq!(report.primary_pattern.confidence, 0.75);
        assert_eq!(report.primary_pattern.niches, vec!["cooking".to_string()]);
        assert_eq!(report.secondary_patterns.len(), 1);
        assert_eq!(report.secondary_patterns[0].statement, "bright thumbnail");
    }

    #[test]
    fn test_hypothesis_used_without_validation() {
        let mut state = SessionState::new(SessionId::new(), "vid");
        state.hypothesis = Some(Hypothesis::new("hook in first 3s", 0.6));
        let report = FinalReport::from_session(&state, None, meta());
        assert_eq!(report.primary_pattern.statement, "hook in first 3s");
        assert_eq!(report.primary_pattern.strength, 0.0);
    }

    #[test]
    fn test_draft_wins() {
        let mut state = SessionState::new(SessionId::new(), "vid");
        state.hypothesis = Some(Hypothesis::new("h", 0.6));
        let draft = ReportDraft {
            primary_pattern: Some(PatternDraft {
                statement: "drafted".into(),
                confidence: 0.9,
                strength: 0.7,
                ..Default::default()
            }),
            recommendations: vec!["post at 6pm".into()],
            ..Default::default()
        };
        let report = FinalReport::from_session(&state, Some(draft), meta());
        assert_eq!(report.primary_pattern.statement, "drafted");
        assert_eq!(report.recommendations, vec!["post at 6pm".to_string()]);
    }

    #[test]
    fn test_result_constructors() {
        let state = SessionState::new(SessionId::new(), "vid");
        let report = FinalReport::from_session(&state, None, meta());
        let ok = InvestigationResult::succeeded(report, BudgetUsage::default());
        assert!(ok.success);
        assert!(ok.failure.is_none());
        assert!(ok.primary_pattern.is_some());

        let failed = InvestigationResult::failed(
            InvestigationMode::Agentic,
            false,
            "phase_failed",
            "boom",
            BudgetUsage::default(),
        );
        assert!(!failed.success);
        assert!(failed.report.is_none());
        assert_eq!(failed.failure.unwrap().code, "phase_failed");
    }
}
