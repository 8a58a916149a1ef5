//! Lossy state compaction for smaller capability tiers.
//!
//! When the active tier shrinks, the state must still fit the new context
//! window. Compaction keeps the newest tool calls, the strongest patterns, the
//! best candidates of each search list and the newest unrecoverable errors.
//! The compaction itself is appended to the error log as a recoverable event
//! so report auditing can see what was discarded.

use serde::{Deserialize, Serialize};

use super::state::SessionState;
use super::types::ErrorRecord;
use crate::budget::CapabilityTier;

/// Error-log source of the audit record each compaction leaves.
pub const COMPACTION_SOURCE: &str = "compaction";

/// How much of each field survives compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionPolicy {
    /// Most recent tool-call log entries kept
    pub tool_calls: usize,
    /// Strongest validation patterns kept
    pub patterns: usize,
    /// Best candidates kept per search list
    pub candidates_per_list: usize,
    /// Most recent unrecoverable errors kept
    pub unrecoverable_errors: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            tool_calls: 10,
            patterns: 3,
            candidates_per_list: 3,
            unrecoverable_errors: 5,
        }
    }
}

/// What a compaction discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub from: Option<CapabilityTier>,
    pub to: Option<CapabilityTier>,
    pub dropped_tool_calls: usize,
    pub dropped_candidates: usize,
    pub dropped_patterns: usize,
    pub dropped_examined_ids: usize,
    pub dropped_errors: usize,
}

impl CompactionReport {
    pub fn is_lossless(&self) -> bool {
        self.dropped_tool_calls == 0
            && self.dropped_candidates == 0
            && self.dropped_patterns == 0
            && self.dropped_examined_ids == 0
            && self.dropped_errors == 0
    }

    fn describe(&self) -> String {
        format!(
            "state compacted {} -> {}: dropped {} tool calls, {} candidates, {} patterns, {} examined ids, {} errors",
            self.from.map(|t| t.as_str()).unwrap_or("?"),
            self.to.map(|t| t.as_str()).unwrap_or("?"),
            self.dropped_tool_calls,
            self.dropped_candidates,
            self.dropped_patterns,
            self.dropped_examined_ids,
            self.dropped_errors,
        )
    }
}

/// Compact `state` for a switch from `from` to `to`.
///
/// # Postconditions
/// - tool-call log, candidate count and pattern count never grow
/// - `search_results.total_candidates` is preserved
/// - exactly one recoverable compaction event is appended to the error log
pub fn compact(
    state: &SessionState,
    policy: &CompactionPolicy,
    from: CapabilityTier,
    to: CapabilityTier,
) -> (SessionState, CompactionReport) {
    let mut next = state.clone();
    let mut report = CompactionReport {
        from: Some(from),
        to: Some(to),
        ..Default::default()
    };

    if next.tool_calls.len() > policy.tool_calls {
        let excess = next.tool_calls.len() - policy.tool_calls;
        next.tool_calls.drain(..excess);
        report.dropped_tool_calls = excess;
    }

    if let Some(validation) = next.validation_results.as_mut() {
        validation
            .patterns
            .sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        if validation.patterns.len() > policy.patterns {
            report.dropped_patterns = validation.patterns.len() - policy.patterns;
            validation.patterns.truncate(policy.patterns);
        }
        report.dropped_examined_ids = validation.examined_ids.len();
        validation.examined_ids.clear();
        validation.truncated = true;
    }

    if let Some(search) = next.search_results.as_mut() {
        for list in search.lists.iter_mut() {
            list.candidates
                .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            if list.candidates.len() > policy.candidates_per_list {
                report.dropped_candidates += list.candidates.len() - policy.candidates_per_list;
                list.candidates.truncate(policy.candidates_per_list);
            }
        }
        search.truncated = true;
    }

    let before = next.errors.len();
    let mut kept: Vec<ErrorRecord> = next.errors.drain(..).filter(|e| !e.recoverable).collect();
    if kept.len() > policy.unrecoverable_errors {
        let excess = kept.len() - policy.unrecoverable_errors;
        kept.drain(..excess);
    }
    report.dropped_errors = before - kept.len();
    next.errors = kept;

    tracing::info!(
        session_id = %state.session_id,
        from = %from,
        to = %to,
        dropped_tool_calls = report.dropped_tool_calls,
        dropped_candidates = report.dropped_candidates,
        dropped_patterns = report.dropped_patterns,
        "Compacted session state"
    );
    next.errors
        .push(ErrorRecord::recoverable(COMPACTION_SOURCE, report.describe()));
    next.active_tier = to;
    next.updated_at = chrono::Utc::now();

    (next, report)
}
