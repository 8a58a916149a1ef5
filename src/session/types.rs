//! Records carried in investigation state.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::PhaseType;
use crate::budget::{CapabilityTier, OperationKind};

/// Opaque identifier of one investigation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Denormalized facts about the subject under investigation. Populated once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectContext {
    pub subject_id: String,
    pub title: String,
    pub channel: Option<String>,
    pub niche: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub views: u64,
    /// Typical views for comparable content from the same source
    pub baseline_views: u64,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

impl SubjectContext {
    /// How far the subject outperformed its baseline (`views / baseline`).
    pub fn outperformance(&self) -> Option<f64> {
        if self.baseline_views == 0 {
            return None;
        }
        Some(self.views as f64 / self.baseline_views as f64)
    }
}

/// Working explanation of the outperformance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub statement: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
    /// Observable signals the hypothesis predicts in comparable content
    #[serde(default)]
    pub signals: Vec<String>,
}

impl Hypothesis {
    pub fn new(statement: impl Into<String>, confidence: f64) -> Self {
        Self {
            statement: statement.into(),
            confidence: confidence.clamp(0.0, 1.0),
            rationale: None,
            signals: Vec::new(),
        }
    }
}

/// Enrichment facts attached to a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    pub channel: Option<String>,
    pub niche: Option<String>,
    pub views: Option<u64>,
    pub tags: Vec<String>,
}

/// One comparable piece of content returned by search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Similarity score assigned by the search tool
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub enrichment: Option<Enrichment>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, title: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            score,
            enrichment: None,
        }
    }
}

/// Candidates returned for one query, with provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResultList {
    pub query: String,
    pub candidates: Vec<Candidate>,
}

/// Output of a search-planning phase. Replaced wholesale per phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub lists: Vec<SearchResultList>,
    /// Candidate count before any compaction
    pub total_candidates: usize,
    #[serde(default)]
    pub truncated: bool,
}

impl SearchResults {
    /// Build from per-query lists, recording the original total.
    pub fn from_lists(lists: Vec<SearchResultList>) -> Self {
        let total_candidates = lists.iter().map(|l| l.candidates.len()).sum();
        Self {
            lists,
            total_candidates,
            truncated: false,
        }
    }

    /// Candidates held right now, summed across lists.
    pub fn candidate_count(&self) -> usize {
        self.lists.iter().map(|l| l.candidates.len()).sum()
    }

    /// Distinct candidates in list order, best score first within the first occurrence.
    pub fn unique_candidates(&self) -> Vec<&Candidate> {
        let mut seen = HashSet::new();
        let mut out: Vec<&Candidate> = self
            .lists
            .iter()
            .flat_map(|l| l.candidates.iter())
            .filter(|c| seen.insert(c.id.as_str()))
            .collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out
    }
}

/// Short description of a pattern found during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub statement: String,
    /// Candidates that exhibit the pattern
    #[serde(default)]
    pub support: u32,
    /// Effect size in `[0, 1]`
    #[serde(default)]
    pub strength: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Output of a validation phase. Replaced wholesale per phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationResults {
    pub validated: u32,
    pub rejected: u32,
    /// Candidates already scored, so later batches pick new ones
    pub examined_ids: Vec<String>,
    /// Patterns, strongest first
    pub patterns: Vec<PatternSummary>,
    pub complete: bool,
    pub truncated: bool,
}

impl ValidationResults {
    pub fn examined(&self) -> usize {
        (self.validated + self.rejected) as usize
    }
}

/// One entry of the tool-call log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub kind: OperationKind,
    pub phase: PhaseType,
    pub tier: CapabilityTier,
    pub success: bool,
    pub tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub attempts: u32,
    /// Served from the per-run result cache
    #[serde(default)]
    pub cached: bool,
    pub at: DateTime<Utc>,
}

/// One entry of the error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Phase, tool or component that produced the error
    pub source: String,
    pub recoverable: bool,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn recoverable(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            recoverable: true,
            at: Utc::now(),
        }
    }

    pub fn unrecoverable(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            recoverable: false,
            at: Utc::now(),
        }
    }
}
