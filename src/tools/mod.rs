//! Tool boundary for the investigation.
//!
//! Tools are the "hands and eyes" of an investigation: subject metadata
//! lookup, similarity search, per-candidate enrichment and batch scoring.
//! Their implementations live outside this crate; here we define the
//! invocation contract, the tagged payload union, a name-keyed registry and
//! the [`ToolCaller`] that applies timeout, retry and caching.

mod caller;

pub use caller::{CallOutcome, ToolCaller};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::budget::{BudgetRemaining, CapabilityTier};
use crate::mode::InvestigationMode;
use crate::retry::Retryable;
use crate::session::{Candidate, Enrichment, SessionId, SubjectContext};

/// Looks up the subject's metadata and baseline.
pub const SUBJECT_METADATA: &str = "subject_metadata";
/// Similarity search for comparable content.
pub const SIMILARITY_SEARCH: &str = "similarity_search";
/// Enrichment lookup for one candidate.
pub const ENRICH_CANDIDATE: &str = "enrich_candidate";
/// Batch performance scoring of candidates against a hypothesis.
pub const BATCH_SCORE: &str = "batch_score";

/// Context passed with every tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_id: SessionId,
    /// Unique per invocation, stable across retries
    pub request_id: Uuid,
    pub mode: InvestigationMode,
    pub tier: CapabilityTier,
    pub remaining: BudgetRemaining,
}

impl ExecutionContext {
    /// Copy with a fresh request id.
    pub fn for_request(&self) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            ..self.clone()
        }
    }
}

/// Score of one candidate against the working hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub candidate_id: String,
    /// The candidate exhibits the hypothesized pattern
    pub matches: bool,
    /// Effect size in `[0, 1]`
    #[serde(default)]
    pub strength: f64,
}

/// Typed tool payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    SubjectContext { context: SubjectContext },
    Search { candidates: Vec<Candidate> },
    Enrichment { candidate_id: String, enrichment: Enrichment },
    Statistics { scores: Vec<CandidateScore> },
    /// Payload that matched none of the known shapes
    Unrecognized { raw: Value },
}

impl ToolOutput {
    /// Classify a raw JSON payload, never failing.
    pub fn from_value(raw: Value) -> Self {
        match serde_json::from_value::<ToolOutput>(raw.clone()) {
            Ok(output) => output,
            Err(_) => Self::Unrecognized { raw },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubjectContext { .. } => "subject_context",
            Self::Search { .. } => "search",
            Self::Enrichment { .. } => "enrichment",
            Self::Statistics { .. } => "statistics",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Successful tool response with its resource usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub output: ToolOutput,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl ToolResponse {
    pub fn new(output: ToolOutput) -> Self {
        Self {
            output,
            tokens: 0,
            cost_usd: 0.0,
        }
    }
}

/// Failed tool invocation.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Tool {tool} failed: {message}")]
pub struct ToolError {
    pub tool: String,
    pub message: String,
    pub retryable: bool,
}

impl ToolError {
    pub fn retryable(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

impl Retryable for ToolError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn timed_out(after: std::time::Duration) -> Self {
        Self::retryable("", format!("timed out after {}ms", after.as_millis()))
    }
}

/// Consumed interface: executes a named tool.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn execute(
        &self,
        tool: &str,
        params: Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolResponse, ToolError>;
}

/// One registrable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResponse, ToolError>;
}

/// Name-keyed set of tools, usable as a [`ToolInvoker`].
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tool under its own name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn execute(
        &self,
        tool: &str,
        params: Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolResponse, ToolError> {
        let handler = self
            .tools
            .get(tool)
            .ok_or_else(|| ToolError::permanent(tool, "unknown tool"))?;
        handler.execute(params, ctx).await
    }
}
