//! Capability backend module for reasoning calls.
//!
//! A backend turns a prompt template plus a summary of the session state
//! into text at a given capability tier. Prompt contents and the concrete
//! model call live outside this crate; this module defines the contract,
//! the typed drafts each template yields, and the policy-wrapped caller.

mod caller;
mod drafts;
mod error;
mod parse;

pub use caller::{BackendCaller, Generated};
pub use drafts::{HypothesisDraft, PatternDraft, ReportDraft, SearchPlan, ValidationVerdict};
pub use error::{BackendError, BackendErrorKind};
pub use parse::{extract_json, parse_structured};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::CapabilityTier;

/// Which reasoning task a generation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    /// Produces a [`HypothesisDraft`]
    Hypothesis,
    /// Produces a [`SearchPlan`]
    SearchPlan,
    /// Produces a [`ValidationVerdict`]
    Validation,
    /// Produces a [`ReportDraft`]
    Report,
}

impl PromptTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hypothesis => "hypothesis",
            Self::SearchPlan => "search_plan",
            Self::Validation => "validation",
            Self::Report => "report",
        }
    }
}

impl std::fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub template: PromptTemplate,
    /// JSON summary of the relevant session state
    pub state_summary: String,
    pub tier: CapabilityTier,
}

/// Token usage information reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Raw backend output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub content: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Consumed interface: a reasoning backend.
#[async_trait]
pub trait CapabilityBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError>;
}
