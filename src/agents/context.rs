//! Per-phase execution context and the handler contract.
//!
//! The orchestrator builds one [`PhaseContext`] per phase, after routing.
//! Handlers use it to reach tools and backends and to report usage; they
//! never touch the session store directly.
//!
//! # Invariants
//! - every non-cached tool call and every backend generation is reported to
//!   the budget tracker exactly once
//! - every call, successful or not, leaves a [`ToolCallRecord`] in the
//!   phase's update

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::types::{PhaseError, PhaseResult, PhaseType};
use crate::budget::{BudgetTracker, CapabilityTier};
use crate::config::RunConfig;
use crate::llm::{BackendCaller, Generated, GenerationRequest, PromptTemplate};
use crate::mode::InvestigationMode;
use crate::session::{ErrorRecord, SessionId, SessionState, ToolCallRecord};
use crate::tools::{CallOutcome, ExecutionContext, ToolCaller};

/// Candidates included in a state summary.
const SUMMARY_CANDIDATES: usize = 20;

/// Everything a phase handler may use while it runs.
pub struct PhaseContext<'a> {
    pub session_id: SessionId,
    pub mode: InvestigationMode,
    pub phase: PhaseType,
    /// Tier chosen by the router for this phase
    pub tier: CapabilityTier,
    pub config: &'a RunConfig,
    pub budget: &'a mut BudgetTracker,
    pub tools: &'a ToolCaller,
    pub backend: &'a BackendCaller,
}

impl<'a> PhaseContext<'a> {
    /// Context for tool invocations, with the current remaining budget.
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext {
            session_id: self.session_id,
            request_id: uuid::Uuid::new_v4(),
            mode: self.mode,
            tier: self.tier,
            remaining: self.budget.remaining(),
        }
    }

    /// Generation request for `template` at the routed tier.
    pub fn request(&self, template: PromptTemplate, state: &SessionState) -> GenerationRequest {
        GenerationRequest {
            template,
            state_summary: summarize_state(state),
            tier: self.tier,
        }
    }

    /// Empty result for the current phase.
    pub fn result(&self) -> PhaseResult {
        PhaseResult::new(self.phase, self.tier)
    }

    /// Fold one tool outcome into the budget and the phase result.
    ///
    /// Cache hits are logged but not charged. A failed call becomes a
    /// recoverable error in the session log.
    pub fn fold_tool_outcome(&mut self, outcome: &CallOutcome, result: &mut PhaseResult) {
        let kind = self.phase.operation_kind();
        let tokens = outcome.billable_tokens();
        let cost = outcome.billable_cost();

        if !outcome.cached {
            self.budget.record_tool_call(kind, tokens, cost);
            result.tool_calls += 1;
            result.tokens += tokens;
            result.cost_usd += cost;
        }

        result.update.tool_calls.push(ToolCallRecord {
            tool: outcome.tool.clone(),
            kind,
            phase: self.phase,
            tier: self.tier,
            success: outcome.is_success(),
            tokens,
            cost_usd: cost,
            duration_ms: outcome.duration.as_millis() as u64,
            attempts: outcome.attempts,
            cached: outcome.cached,
            at: Utc::now(),
        });

        if let Err(e) = &outcome.result {
            result
                .update
                .errors
                .push(ErrorRecord::recoverable(self.phase.as_str(), e.to_string()));
        }
    }

    /// Fold one backend generation into the budget and the phase result.
    ///
    /// Usage is charged whether or not the output parsed.
    pub fn fold_generation<T>(
        &mut self,
        template: PromptTemplate,
        generated: &Generated<T>,
        result: &mut PhaseResult,
    ) {
        let kind = self.phase.operation_kind();
        self.budget
            .record_tool_call(kind, generated.tokens, generated.cost_usd);
        result.tool_calls += 1;
        result.tokens += generated.tokens;
        result.cost_usd += generated.cost_usd;

        result.update.tool_calls.push(ToolCallRecord {
            tool: format!("backend:{}", template),
            kind,
            phase: self.phase,
            tier: self.tier,
            success: generated.value.is_ok(),
            tokens: generated.tokens,
            cost_usd: generated.cost_usd,
            duration_ms: generated.duration.as_millis() as u64,
            attempts: generated.attempts,
            cached: false,
            at: Utc::now(),
        });

        if let Err(e) = &generated.value {
            result
                .update
                .errors
                .push(ErrorRecord::recoverable(self.phase.as_str(), e.to_string()));
        }
    }
}

/// One step of the investigation.
///
/// # Postconditions
/// - `Ok` carries a result whose usage is already in the budget tracker
/// - `Err` only for failures that make the rest of the run pointless
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    fn phase(&self) -> PhaseType;

    async fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        state: &SessionState,
    ) -> Result<PhaseResult, PhaseError>;
}

/// Compact JSON view of the state handed to backends.
pub fn summarize_state(state: &SessionState) -> String {
    let candidates: Vec<_> = state
        .search_results
        .as_ref()
        .map(|r| {
            r.unique_candidates()
                .into_iter()
                .take(SUMMARY_CANDIDATES)
                .map(|c| {
                    json!({
                        "id": c.id,
                        "title": c.title,
                        "score": c.score,
                        "tags": c.enrichment.as_ref().map(|e| e.tags.clone()).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let validation = state.validation_results.as_ref().map(|v| {
        json!({
            "validated": v.validated,
            "rejected": v.rejected,
            "patterns": v.patterns,
        })
    });

    json!({
        "subject_id": state.subject_id,
        "context": state.context,
        "outperformance": state.context.as_ref().and_then(|c| c.outperformance()),
        "hypothesis": state.hypothesis,
        "candidates": candidates,
        "candidate_count": state.candidate_count(),
        "validation": validation,
        "errors": state.errors.len(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{quick_config, MockBackend, MockTools};
    use crate::budget::BudgetCaps;
    use crate::llm::HypothesisDraft;
    use crate::session::Hypothesis;
    use crate::tools::SUBJECT_METADATA;
    use serde_json::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cached_calls_not_charged() {
        let config = quick_config();
        let mut tracker = BudgetTracker::new(BudgetCaps::default());
        let tools = ToolCaller::new(Arc::new(MockTools::new()), config.call_policy(), true);
        let backend = BackendCaller::new(Arc::new(MockBackend::new()), config.call_policy());
        let mut ctx = PhaseContext {
            session_id: SessionId::new(),
            mode: InvestigationMode::Agentic,
            phase: PhaseType::ContextGathering,
            tier: CapabilityTier::Low,
            config: &config,
            budget: &mut tracker,
            tools: &tools,
            backend: &backend,
        };
        let mut result = ctx.result();

        let exec = ctx.execution_context();
        let params = json!({"subject_id": "vid"});
        let first = tools.call(SUBJECT_METADATA, params.clone(), &exec).await;
        let second = tools.call(SUBJECT_METADATA, params, &exec).await;
        ctx.fold_tool_outcome(&first, &mut result);
        ctx.fold_tool_outcome(&second, &mut result);

        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.update.tool_calls.len(), 2);
        assert!(result.update.tool_calls[1].cached);
        assert_eq!(tracker.usage().tool_calls, 1);
    }

    #[tokio::test]
    async fn test_failed_generation_charged_and_logged() {
        let config = quick_config();
        let mut tracker = BudgetTracker::new(BudgetCaps::default());
        let tools = ToolCaller::new(Arc::new(MockTools::new()), config.call_policy(), false);
        let backend = BackendCaller::new(
            Arc::new(MockBackend::new().failing(PromptTemplate::Hypothesis)),
            config.call_policy(),
        );
        let mut ctx = PhaseContext {
            session_id: SessionId::new(),
            mode: InvestigationMode::Agentic,
            phase: PhaseType::HypothesisGeneration,
            tier: CapabilityTier::High,
            config: &config,
            budget: &mut tracker,
            tools: &tools,
            backend: &backend,
        };
        let state = SessionState::new(ctx.session_id, "vid");
        let request = ctx.request(PromptTemplate::Hypothesis, &state);
        let generated = backend.generate::<HypothesisDraft>(&request).await;

        let mut result = ctx.result();
        ctx.fold_generation(PromptTemplate::Hypothesis, &generated, &mut result);

        assert_eq!(tracker.usage().tool_calls, 1);
        assert_eq!(result.update.errors.len(), 1);
        assert!(result.update.errors[0].recoverable);
        assert_eq!(result.update.tool_calls[0].tool, "backend:hypothesis");
        assert!(!result.update.tool_calls[0].success);
    }

    #[test]
    fn test_summary_is_json() {
        let mut state = SessionState::new(SessionId::new(), "vid");
        state.hypothesis = Some(Hypothesis::new("big faces", 0.4));
        let summary: Value = serde_json::from_str(&summarize_state(&state)).unwrap();
        assert_eq!(summary["subject_id"], "vid");
        assert_eq!(summary["hypothesis"]["statement"], "big faces");
        assert_eq!(summary["candidate_count"], 0);
    }
}
