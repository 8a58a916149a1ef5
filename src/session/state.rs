//! Investigation state and the merge rule that governs every mutation.
//!
//! # Merge Rule
//! - List fields (tool-call log, error log) are appended to
//! - Record fields (context, hypothesis, search results, validation results)
//!   are replaced wholesale when present in the update, untouched otherwise
//!
//! [`merge`] is a pure function so the rule can be tested without a manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{
    ErrorRecord, Hypothesis, SearchResults, SessionId, SubjectContext, ToolCallRecord,
    ValidationResults,
};
use crate::budget::CapabilityTier;

/// Default number of tool-call log entries kept by [`merge`].
pub const TOOL_LOG_RETENTION: usize = 200;

/// Mutable state of one investigation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub subject_id: String,
    pub context: Option<SubjectContext>,
    pub hypothesis: Option<Hypothesis>,
    pub search_results: Option<SearchResults>,
    pub validation_results: Option<ValidationResults>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub errors: Vec<ErrorRecord>,
    /// Tier whose context window the state is currently shaped for
    pub active_tier: CapabilityTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Empty state for a new run.
    pub fn new(session_id: SessionId, subject_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            subject_id: subject_id.into(),
            context: None,
            hypothesis: None,
            search_results: None,
            validation_results: None,
            tool_calls: Vec::new(),
            errors: Vec::new(),
            active_tier: CapabilityTier::High,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_unrecoverable_error(&self) -> bool {
        self.errors.iter().any(|e| !e.recoverable)
    }

    /// Number of candidates currently held in search results.
    pub fn candidate_count(&self) -> usize {
        self.search_results
            .as_ref()
            .map(|s| s.candidate_count())
            .unwrap_or(0)
    }

    pub fn validated_count(&self) -> u32 {
        self.validation_results
            .as_ref()
            .map(|v| v.validated)
            .unwrap_or(0)
    }

    pub fn hypothesis_confidence(&self) -> Option<f64> {
        self.hypothesis.as_ref().map(|h| h.confidence)
    }
}

/// Partial update submitted by a phase.
///
/// `None` record fields leave the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionUpdate {
    pub context: Option<SubjectContext>,
    pub hypothesis: Option<Hypothesis>,
    pub search_results: Option<SearchResults>,
    pub validation_results: Option<ValidationResults>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub errors: Vec<ErrorRecord>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.context.is_none()
            && self.hypothesis.is_none()
            && self.search_results.is_none()
            && self.validation_results.is_none()
            && self.tool_calls.is_empty()
            && self.errors.is_empty()
    }

    pub fn with_hypothesis(mut self, hypothesis: Hypothesis) -> Self {
        self.hypothesis = Some(hypothesis);
        self
    }

    pub fn with_error(mut self, error: ErrorRecord) -> Self {
        self.errors.push(error);
        self
    }
}

/// Merge `update` into `old`, keeping at most [`TOOL_LOG_RETENTION`] tool calls.
pub fn merge(old: &SessionState, update: SessionUpdate) -> SessionState {
    merge_with_retention(old, update, TOOL_LOG_RETENTION)
}

/// Merge with an explicit tool-call retention window.
///
/// # Postconditions
/// - a record field absent from `update` equals its value in `old`
/// - `new.errors.len() == old.errors.len() + update.errors.len()`
/// - `new.tool_calls.len() <= max(retention, old.tool_calls.len())`
pub fn merge_with_retention(
    old: &SessionState,
    update: SessionUpdate,
    retention: usize,
) -> SessionState {
    let mut next = old.clone();

    if let Some(context) = update.context {
        next.context = Some(context);
    }
    if let Some(hypothesis) = update.hypothesis {
        next.hypothesis = Some(hypothesis);
    }
    if let Some(search) = update.search_results {
        next.search_results = Some(search);
    }
    if let Some(validation) = update.validation_results {
        next.validation_results = Some(validation);
    }

    let appended = !update.tool_calls.is_empty() || !update.errors.is_empty();
    next.tool_calls.extend(update.tool_calls);
    if next.tool_calls.len() > retention && appended {
        let excess = next.tool_calls.len() - retention;
        next.tool_calls.drain(..excess);
    }
    next.errors.extend(update.errors);

    next.updated_at = Utc::now();
    next
}
