//! Session module - investigation state, its merge rule and its store.
//!
//! # Key Concepts
//! - SessionState: explicit-field state of one run
//! - SessionUpdate: partial update; lists append, records replace wholesale
//! - Compaction: lossy reshaping when moving to a smaller capability tier
//! - SessionManager: keyed store with snapshots and delayed deletion

mod compaction;
mod manager;
mod state;
mod types;

pub use compaction::{compact, CompactionPolicy, CompactionReport, COMPACTION_SOURCE};
pub use manager::{SessionError, SessionManager, SessionManagerConfig, SessionSummary};
pub use state::{merge, merge_with_retention, SessionState, SessionUpdate, TOOL_LOG_RETENTION};
pub use types::{
    Candidate, Enrichment, ErrorRecord, Hypothesis, PatternSummary, SearchResultList,
    SearchResults, SessionId, SubjectContext, ToolCallRecord, ValidationResults,
};
