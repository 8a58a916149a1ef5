//! Typed shapes the backends are asked to produce, one per template.

use serde::{Deserialize, Serialize};

use crate::session::{Hypothesis, PatternSummary};

/// Proposed explanation of the outperformance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisDraft {
    pub statement: String,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub signals: Vec<String>,
}

impl From<HypothesisDraft> for Hypothesis {
    fn from(draft: HypothesisDraft) -> Self {
        let mut hypothesis = Hypothesis::new(draft.statement, draft.confidence);
        hypothesis.rationale = draft.rationale;
        hypothesis.signals = draft.signals;
        hypothesis
    }
}

/// Queries to fan out to similarity search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPlan {
    pub queries: Vec<String>,
    /// Candidates requested per query
    pub limit_per_query: Option<u32>,
}

/// Judgement on a validation batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationVerdict {
    /// The evidence is sufficient to finalize; `false` asks for another batch
    pub complete: bool,
    /// Patterns observed so far, strongest first
    pub patterns: Vec<PatternSummary>,
    pub summary: Option<String>,
    /// Revised confidence in the hypothesis
    pub confidence: Option<f64>,
}

/// Report content proposed by the synthesis backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportDraft {
    pub primary_pattern: Option<PatternDraft>,
    pub secondary_patterns: Vec<PatternDraft>,
    pub recommendations: Vec<String>,
    pub competitive_insights: Vec<String>,
    pub channel_insights: Vec<String>,
}

/// Pattern as written by the synthesis backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternDraft {
    pub statement: String,
    pub confidence: f64,
    pub strength: f64,
    pub evidence: Vec<String>,
    pub niches: Vec<String>,
}
