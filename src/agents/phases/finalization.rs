//! Finalization: ask the backend to write up the findings.

use async_trait::async_trait;

use crate::agents::context::{PhaseContext, PhaseHandler};
use crate::agents::types::{PhaseError, PhaseResult, PhaseType};
use crate::llm::{PromptTemplate, ReportDraft};
use crate::session::SessionState;

/// Produces a report draft. On failure the orchestrator assembles the
/// report from session state alone.
pub struct Finalization;

#[async_trait]
impl PhaseHandler for Finalization {
    fn phase(&self) -> PhaseType {
        PhaseType::Finalization
    }

    async fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        state: &SessionState,
    ) -> Result<PhaseResult, PhaseError> {
        let mut result = ctx.result();
        let request = ctx.request(PromptTemplate::Report, state);
        let generated = ctx.backend.generate::<ReportDraft>(&request).await;
        ctx.fold_generation(PromptTemplate::Report, &generated, &mut result);

        result.draft = generated.value.ok();
        Ok(result.completed())
    }
}
