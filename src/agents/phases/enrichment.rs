//! Enrichment: per-candidate lookups for the strongest candidates.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::context::{PhaseContext, PhaseHandler};
use crate::agents::types::{PhaseError, PhaseResult, PhaseType};
use crate::session::{self, ErrorRecord, SessionState};
use crate::tools::{ToolOutput, ENRICH_CANDIDATE};

/// Enriches candidates that have not been enriched yet, best score first.
pub struct Enrichment {
    /// Lookups per phase, further bounded by remaining tool calls
    pub max_lookups: usize,
}

impl Default for Enrichment {
    fn default() -> Self {
        Self { max_lookups: 20 }
    }
}

#[async_trait]
impl PhaseHandler for Enrichment {
    fn phase(&self) -> PhaseType {
        PhaseType::Enrichment
    }

    async fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        state: &SessionState,
    ) -> Result<PhaseResult, PhaseError> {
        let mut result = ctx.result();
        let Some(search) = &state.search_results else {
            result.reasoning = Some("nothing to enrich".to_string());
            return Ok(result);
        };

        let allowance = self
            .max_lookups
            .min(ctx.budget.remaining().tool_calls as usize);
        let targets: Vec<String> = search
            .unique_candidates()
            .into_iter()
            .filter(|c| c.enrichment.is_none())
            .take(allowance)
            .map(|c| c.id.clone())
            .collect();
        if targets.is_empty() {
            return Ok(result);
        }

        let calls: Vec<_> = targets
            .iter()
            .map(|id| (ENRICH_CANDIDATE.to_string(), json!({ "candidate_id": id })))
            .collect();
        let exec = ctx.execution_context();
        let outcomes = ctx
            .tools
            .call_many(calls, &exec, ctx.config.parallel_sub_calls)
            .await;

        let mut enrichments: HashMap<String, session::Enrichment> = HashMap::new();
        for (id, outcome) in targets.into_iter().zip(outcomes) {
            ctx.fold_tool_outcome(&outcome, &mut result);
            if let Ok(response) = outcome.result {
                match response.output {
                    ToolOutput::Enrichment { enrichment, .. } => {
                        enrichments.insert(id, enrichment);
                    }
                    other => result.update.errors.push(ErrorRecord::recoverable(
                        self.phase().as_str(),
                        format!("{} returned a {} payload", ENRICH_CANDIDATE, other.kind()),
                    )),
                }
            }
        }

        if enrichments.is_empty() {
            return Ok(result);
        }

        let mut enriched = search.clone();
        for candidate in enriched.lists.iter_mut().flat_map(|l| l.candidates.iter_mut()) {
            if let Some(e) = enrichments.get(&candidate.id) {
                candidate.enrichment = Some(e.clone());
            }
        }
        tracing::info!(
            session_id = %ctx.session_id,
            enriched = enrichments.len(),
            "Enrichment complete"
        );
        result.update.search_results = Some(enriched);
        Ok(result)
    }
}
