//! Search planning: one fan-out round of similarity queries.

use async_trait::async_trait;
use serde_json::json;

use crate::agents::context::{PhaseContext, PhaseHandler};
use crate::agents::types::{PhaseError, PhaseResult, PhaseType};
use crate::llm::{PromptTemplate, SearchPlan};
use crate::session::{ErrorRecord, SearchResultList, SearchResults, SessionState};
use crate::tools::{ToolOutput, SIMILARITY_SEARCH};

/// Claims a fan-out, asks the backend for queries and runs them.
pub struct SearchPlanning {
    /// Queries issued per fan-out
    pub max_queries: usize,
    /// Candidates requested per query when the plan gives no limit
    pub default_limit: u32,
}

impl Default for SearchPlanning {
    fn default() -> Self {
        Self {
            max_queries: 5,
            default_limit: 10,
        }
    }
}

impl SearchPlanning {
    /// Queries from the plan, or from the state when the plan has none.
    fn queries(&self, plan: Option<SearchPlan>, state: &SessionState) -> Vec<String> {
        let mut queries: Vec<String> = plan
            .map(|p| p.queries)
            .unwrap_or_default()
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        if queries.is_empty() {
            if let Some(h) = &state.hypothesis {
                queries.push(h.statement.clone());
            }
            if let Some(c) = &state.context {
                if !c.title.is_empty() {
                    queries.push(c.title.clone());
                }
                if let Some(niche) = &c.niche {
                    queries.push(niche.clone());
                }
            }
            if queries.is_empty() {
                queries.push(state.subject_id.clone());
            }
        }

        queries.dedup();
        queries.truncate(self.max_queries.max(1));
        queries
    }
}

#[async_trait]
impl PhaseHandler for SearchPlanning {
    fn phase(&self) -> PhaseType {
        PhaseType::SearchPlanning
    }

    async fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        state: &SessionState,
    ) -> Result<PhaseResult, PhaseError> {
        let mut result = ctx.result();
        if !ctx.budget.record_fanout() {
            tracing::info!(session_id = %ctx.session_id, "No fan-out capacity left");
            result.reasoning = Some("no fan-out capacity left".to_string());
            return Ok(result);
        }

        let request = ctx.request(PromptTemplate::SearchPlan, state);
        let generated = ctx.backend.generate::<SearchPlan>(&request).await;
        ctx.fold_generation(PromptTemplate::SearchPlan, &generated, &mut result);

        let plan = generated.value.ok();
        let limit = plan
            .as_ref()
            .and_then(|p| p.limit_per_query)
            .unwrap_or(self.default_limit)
            .min(ctx.budget.remaining().candidates.max(1));
        let queries = self.queries(plan, state);

        let calls: Vec<_> = queries
            .iter()
            .map(|q| {
                (
                    SIMILARITY_SEARCH.to_string(),
                    json!({ "query": q, "limit": limit, "exclude": state.subject_id }),
                )
            })
            .collect();
        let exec = ctx.execution_context();
        let outcomes = ctx
            .tools
            .call_many(calls, &exec, ctx.config.parallel_sub_calls)
            .await;

        let mut lists = Vec::new();
        for (query, outcome) in queries.into_iter().zip(outcomes) {
            ctx.fold_tool_outcome(&outcome, &mut result);
            if let Ok(response) = outcome.result {
                match response.output {
                    ToolOutput::Search { candidates } => lists.push(SearchResultList { query, candidates }),
                    other => result.update.errors.push(ErrorRecord::recoverable(
                        self.phase().as_str(),
                        format!("{} returned a {} payload", SIMILARITY_SEARCH, other.kind()),
                    )),
                }
            }
        }

        // Lists from earlier fan-outs are kept.
        if let Some(previous) = &state.search_results {
            let mut all = previous.lists.clone();
            all.extend(lists);
            lists = all;
        }
        let results = SearchResults::from_lists(lists);
        tracing::info!(
            session_id = %ctx.session_id,
            lists = results.lists.len(),
            candidates = results.candidate_count(),
            "Search fan-out complete"
        );
        result.update.search_results = Some(results);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::phases::harness::{run_phase, tracker};
    use crate::agents::testing::{MockBackend, MockTools};
    use crate::budget::{BudgetCaps, BudgetTracker};
    use crate::session::{Hypothesis, SessionId};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fans_out_plan_queries() {
        let state = SessionState::new(SessionId::new(), "vid");
        let tools = Arc::new(MockTools::new());
        let mut budget = tracker();
        let result = run_phase(&SearchPlanning::default(), &state, &mut budget, tools.clone(), Arc::new(MockBackend::new()))
            .await
            .unwrap();

        let results = result.update.search_results.unwrap();
        assert_eq!(results.lists.len(), 2);
        // plan asks for 5 per query
        assert_eq!(results.candidate_count(), 10);
        assert_eq!(tools.calls(SIMILARITY_SEARCH), 2);
        assert_eq!(budget.usage().fanouts, 1);
        // plan generation plus two searches
        assert_eq!(budget.usage().tool_calls, 3);
    }

    #[tokio::test]
    async fn test_denied_fanout_is_not_an_error() {
        let state = SessionState::new(SessionId::new(), "vid");
        let mut budget = BudgetTracker::new(BudgetCaps {
            max_fanouts: 1,
            ..BudgetCaps::default()
        });
        assert!(budget.record_fanout());

        let tools = Arc::new(MockTools::new());
        let result = run_phase(&SearchPlanning::default(), &state, &mut budget, tools.clone(), Arc::new(MockBackend::new()))
            .await
            .unwrap();
        assert!(result.update.errors.is_empty());
        assert!(result.update.search_results.is_none());
        assert_eq!(tools.calls(SIMILARITY_SEARCH), 0);
        assert_eq!(budget.usage().fanouts, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_state_queries() {
        let mut state = SessionState::new(SessionId::new(), "vid");
        state.hypothesis = Some(Hypothesis::new("big faces", 0.5));
        let backend = Arc::new(MockBackend::new().failing(PromptTemplate::SearchPlan));
        let mut budget = tracker();
        let result = run_phase(&SearchPlanning::default(), &state, &mut budget, Arc::new(MockTools::new()), backend)
            .await
            .unwrap();

        let results = result.update.search_results.unwrap();
        assert_eq!(results.lists.len(), 1);
        assert_eq!(results.lists[0].query, "big faces");
        assert_eq!(result.update.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_queries_logged() {
        let state = SessionState::new(SessionId::new(), "vid");
        let tools = Arc::new(MockTools::new().failing(SIMILARITY_SEARCH));
        let mut budget = tracker();
        let result = run_phase(&SearchPlanning::default(), &state, &mut budget, tools, Arc::new(MockBackend::new()))
            .await
            .unwrap();
        assert_eq!(result.update.errors.len(), 2);
        assert_eq!(result.update.search_results.unwrap().candidate_count(), 0);
    }
}
