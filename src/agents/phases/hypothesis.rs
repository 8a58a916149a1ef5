//! Hypothesis generation.

use async_trait::async_trait;

use crate::agents::context::{PhaseContext, PhaseHandler};
use crate::agents::types::{PhaseError, PhaseResult, PhaseType};
use crate::llm::{HypothesisDraft, PromptTemplate};
use crate::routing::phase_token_estimate;
use crate::session::{ErrorRecord, Hypothesis, SessionState};

/// Asks the backend why the subject outperformed.
///
/// A failed generation leaves the hypothesis unset; later phases then work
/// from the subject's own title and niche.
pub struct HypothesisGeneration;

#[async_trait]
impl PhaseHandler for HypothesisGeneration {
    fn phase(&self) -> PhaseType {
        PhaseType::HypothesisGeneration
    }

    async fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        state: &SessionState,
    ) -> Result<PhaseResult, PhaseError> {
        let mut result = ctx.result();
        let kind = self.phase().operation_kind();
        if !ctx.budget.can_execute(kind, Some(phase_token_estimate(self.phase()))) {
            result.update.errors.push(ErrorRecord::recoverable(
                self.phase().as_str(),
                "not enough budget left for hypothesis generation",
            ));
            return Ok(result);
        }

        let request = ctx.request(PromptTemplate::Hypothesis, state);
        let generated = ctx.backend.generate::<HypothesisDraft>(&request).await;
        ctx.fold_generation(PromptTemplate::Hypothesis, &generated, &mut result);

        if let Ok(draft) = generated.value {
            let hypothesis = Hypothesis::from(draft);
            tracing::info!(
                session_id = %ctx.session_id,
                confidence = hypothesis.confidence,
                "Hypothesis: {}",
                hypothesis.statement
            );
            result.reasoning = hypothesis.rationale.clone();
            result.update.hypothesis = Some(hypothesis);
        }
        Ok(result)
    }
}
