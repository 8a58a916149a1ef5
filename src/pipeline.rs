//! Deterministic investigation pipeline.
//!
//! A fixed three-call sequence with no reasoning backend:
//!
//! ```text
//! subject metadata ─► one similarity search ─► batch score ─► shared-tag report
//! ```
//!
//! Used when mode selection picks the deterministic mode and as the fallback
//! when an agentic run fails. Tool calls are charged to the budget tracker;
//! caps are never checked.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::budget::{BudgetTracker, OperationKind};
use crate::mode::InvestigationMode;
use crate::report::{FinalReport, PrimaryPattern, RunMetadata};
use crate::session::{Candidate, SubjectContext};
use crate::tools::{
    CallOutcome, ExecutionContext, ToolCaller, ToolError, ToolOutput, ToolResponse, BATCH_SCORE,
    SIMILARITY_SEARCH, SUBJECT_METADATA,
};

/// Pipeline failure. Any failed step fails the whole pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{tool} returned a {kind} payload")]
    UnexpectedPayload {
        tool: &'static str,
        kind: &'static str,
    },
}

/// A fixed, backend-free investigation.
#[async_trait]
pub trait DeterministicPipeline: Send + Sync {
    /// Investigate `subject_id`, charging every call to `budget`.
    ///
    /// The returned report's metadata carries only the mode; the caller
    /// fills in usage.
    async fn run(
        &self,
        subject_id: &str,
        tools: &ToolCaller,
        ctx: &ExecutionContext,
        budget: &mut BudgetTracker,
    ) -> Result<FinalReport, PipelineError>;
}

/// Metadata, one search, one scoring batch, then a report from the tags the
/// matching candidates share.
#[derive(Debug, Clone)]
pub struct FixedPipeline {
    /// Candidates requested from the search
    pub search_limit: u32,
    /// Candidates sent for scoring
    pub score_top: usize,
    /// Matches a tag needs to count as a secondary pattern
    pub min_support: usize,
}

impl Default for FixedPipeline {
    fn default() -> Self {
        Self {
            search_limit: 20,
            score_top: 20,
            min_support: 2,
        }
    }
}

impl FixedPipeline {
    /// Build the report from the scored candidates.
    fn report(&self, context: &SubjectContext, matched: &[(&Candidate, f64)]) -> FinalReport {
        let mut tally: HashMap<&str, Vec<&Candidate>> = HashMap::new();
        for (candidate, _) in matched {
            if let Some(e) = &candidate.enrichment {
                for tag in &e.tags {
                    tally.entry(tag.as_str()).or_default().push(*candidate);
                }
            }
        }
        let mut tags: Vec<(&str, Vec<&Candidate>)> = tally.into_iter().collect();
        tags.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(b.0)));

        let total = matched.len().max(1);
        let strength = if matched.is_empty() {
            0.0
        } else {
            matched.iter().map(|(_, s)| s).sum::<f64>() / matched.len() as f64
        };
        let niches: Vec<String> = context.niche.iter().cloned().collect();
        let pattern = |tag: &str, holders: &[&Candidate]| PrimaryPattern {
            statement: format!(
                "Outperformers share '{}' ({} of {} matches)",
                tag,
                holders.len(),
                matched.len()
            ),
            confidence: holders.len() as f64 / total as f64,
            strength,
            evidence: holders.iter().take(5).map(|c| c.title.clone()).collect(),
            niches: niches.clone(),
        };

        let mut iter = tags.iter();
        let primary_pattern = iter
            .next()
            .map(|(tag, holders)| pattern(tag, holders))
            .unwrap_or_else(PrimaryPattern::empty);
        let secondary_patterns = iter
            .filter(|(_, holders)| holders.len() >= self.min_support)
            .take(2)
            .map(|(tag, holders)| pattern(tag, holders))
            .collect();

        let recommendations = tags
            .first()
            .map(|(tag, _)| vec![format!("Lead with '{}'", tag)])
            .unwrap_or_default();
        let channel_insights = match (context.channel.as_ref(), context.outperformance()) {
            (Some(channel), Some(ratio)) => {
                vec![format!("{:.1}x the {} baseline", ratio, channel)]
            }
            (None, Some(ratio)) => vec![format!("{:.1}x the channel baseline", ratio)],
            _ => Vec::new(),
        };

        FinalReport {
            subject_id: context.subject_id.clone(),
            primary_pattern,
            secondary_patterns,
            recommendations,
            competitive_insights: Vec::new(),
            channel_insights,
            metadata: RunMetadata::new(InvestigationMode::Deterministic),
        }
    }
}

/// Charge a call and unwrap its response.
fn settle(
    budget: &mut BudgetTracker,
    kind: OperationKind,
    outcome: CallOutcome,
) -> Result<ToolResponse, PipelineError> {
    if !outcome.cached {
        budget.record_tool_call(kind, outcome.billable_tokens(), outcome.billable_cost());
    }
    outcome.result.map_err(PipelineError::from)
}

#[async_trait]
impl DeterministicPipeline for FixedPipeline {
    async fn run(
        &self,
        subject_id: &str,
        tools: &ToolCaller,
        ctx: &ExecutionContext,
        budget: &mut BudgetTracker,
    ) -> Result<FinalReport, PipelineError> {
        let outcome = tools
            .call(SUBJECT_METADATA, json!({ "subject_id": subject_id }), ctx)
            .await;
        let context = match settle(budget, OperationKind::ContextLookup, outcome)?.output {
            ToolOutput::SubjectContext { context } => context,
            other => {
                return Err(PipelineError::UnexpectedPayload {
                    tool: SUBJECT_METADATA,
                    kind: other.kind(),
                })
            }
        };

        let query = if !context.title.is_empty() {
            context.title.clone()
        } else {
            context.niche.clone().unwrap_or_else(|| subject_id.to_string())
        };
        let outcome = tools
            .call(
                SIMILARITY_SEARCH,
                json!({
                    "query": query,
                    "limit": self.search_limit,
                    "exclude": subject_id,
                    "include_tags": true,
                }),
                ctx,
            )
            .await;
        let mut candidates = match settle(budget, OperationKind::Search, outcome)?.output {
            ToolOutput::Search { candidates } => candidates,
            other => {
                return Err(PipelineError::UnexpectedPayload {
                    tool: SIMILARITY_SEARCH,
                    kind: other.kind(),
                })
            }
        };
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.score_top);

        let matched: Vec<(&Candidate, f64)> = if candidates.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
            let outcome = tools
                .call(
                    BATCH_SCORE,
                    json!({
                        "hypothesis": format!("shares the traits of {}", query),
                        "candidate_ids": ids,
                    }),
                    ctx,
                )
                .await;
            let scores = match settle(budget, OperationKind::Validation, outcome)?.output {
                ToolOutput::Statistics { scores } => scores,
                other => {
                    return Err(PipelineError::UnexpectedPayload {
                        tool: BATCH_SCORE,
                        kind: other.kind(),
                    })
                }
            };
            scores
                .iter()
                .filter(|s| s.matches)
                .filter_map(|s| {
                    candidates
                        .iter()
                        .find(|c| c.id == s.candidate_id)
                        .map(|c| (c, s.strength))
                })
                .collect()
        };

        tracing::info!(
            subject_id = %subject_id,
            candidates = candidates.len(),
            matched = matched.len(),
            "Deterministic pipeline complete"
        );
        Ok(self.report(&context, &matched))
    }
}
