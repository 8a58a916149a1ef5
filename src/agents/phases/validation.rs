//! Validation: score a batch of unexamined candidates, then ask for a verdict.
//!
//! # Algorithm
//! 1. pick up to `batch_size` unexamined candidates, best score first
//! 2. claim a validation batch; a denial ends validation without error
//! 3. batch-score the candidates against the hypothesis
//! 4. ask the backend whether the evidence suffices
//! 5. request another round while the verdict is incomplete and candidates remain

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::context::{PhaseContext, PhaseHandler};
use crate::agents::types::{PhaseError, PhaseResult, PhaseType};
use crate::llm::{PromptTemplate, ValidationVerdict};
use crate::session::{ErrorRecord, SessionState};
use crate::tools::{ToolOutput, BATCH_SCORE};

pub struct Validation {
    pub batch_size: usize,
}

impl Default for Validation {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

#[async_trait]
impl PhaseHandler for Validation {
    fn phase(&self) -> PhaseType {
        PhaseType::Validation
    }

    async fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        state: &SessionState,
    ) -> Result<PhaseResult, PhaseError> {
        let mut result = ctx.result();
        let mut results = state.validation_results.clone().unwrap_or_default();

        let unexamined: Vec<String> = {
            let examined: HashSet<&str> = results.examined_ids.iter().map(String::as_str).collect();
            state
                .search_results
                .as_ref()
                .map(|s| {
                    s.unique_candidates()
                        .into_iter()
                        .filter(|c| !examined.contains(c.id.as_str()))
                        .map(|c| c.id.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        let size = self
            .batch_size
            .min(ctx.budget.remaining().candidates as usize);
        let batch: Vec<String> = unexamined.iter().take(size).cloned().collect();

        if batch.is_empty() {
            result.reasoning = Some("no candidates left to validate".to_string());
            return Ok(result);
        }
        if !ctx.budget.record_validation(batch.len() as u32) {
            tracing::info!(session_id = %ctx.session_id, "No validation capacity left");
            result.reasoning = Some("no validation capacity left".to_string());
            return Ok(result);
        }

        let statement = state
            .hypothesis
            .as_ref()
            .map(|h| h.statement.clone())
            .unwrap_or_else(|| format!("shares what made {} outperform", state.subject_id));
        let exec = ctx.execution_context();
        let outcome = ctx
            .tools
            .call(
                BATCH_SCORE,
                json!({ "hypothesis": statement, "candidate_ids": batch }),
                &exec,
            )
            .await;
        ctx.fold_tool_outcome(&outcome, &mut result);

        results.examined_ids.extend(batch.iter().cloned());
        if let Ok(response) = outcome.result {
            match response.output {
                ToolOutput::Statistics { scores } => {
                    for score in scores {
                        if score.matches {
                            results.validated += 1;
                        } else {
                            results.rejected += 1;
                        }
                    }
                }
                other => result.update.errors.push(ErrorRecord::recoverable(
                    self.phase().as_str(),
                    format!("{} returned a {} payload", BATCH_SCORE, other.kind()),
                )),
            }
        }
        let left = unexamined.len() - batch.len();

        let mut view = state.clone();
        view.validation_results = Some(results.clone());
        let request = ctx.request(PromptTemplate::Validation, &view);
        let generated = ctx.backend.generate::<ValidationVerdict>(&request).await;
        ctx.fold_generation(PromptTemplate::Validation, &generated, &mut result);

        match generated.value {
            Ok(verdict) => {
                if !verdict.patterns.is_empty() {
                    let mut patterns = verdict.patterns;
                    patterns.sort_by(|a, b| {
                        b.strength
                            .partial_cmp(&a.strength)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    results.patterns = patterns;
                }
                results.complete = verdict.complete;
                result.needs_more = !verdict.complete && left > 0;
                if let (Some(confidence), Some(hypothesis)) = (verdict.confidence, &state.hypothesis) {
                    let mut revised = hypothesis.clone();
                    revised.confidence = confidence.clamp(0.0, 1.0);
                    result.update.hypothesis = Some(revised);
                }
                result.reasoning = verdict.summary;
            }
            // Without a verdict, keep going while evidence remains.
            Err(_) => result.needs_more = left > 0,
        }

        tracing::info!(
            session_id = %ctx.session_id,
            validated = results.validated,
            rejected = results.rejected,
            remaining = left,
            needs_more = result.needs_more,
            "Validation batch complete"
        );
        result.update.validation_results = Some(results);
        Ok(result)
    }
}
