//! Context gathering: who is the subject and how far did it outperform.

use async_trait::async_trait;
use serde_json::json;

use crate::agents::context::{PhaseContext, PhaseHandler};
use crate::agents::types::{PhaseError, PhaseResult, PhaseType};
use crate::session::SessionState;
use crate::tools::{ToolOutput, SUBJECT_METADATA};

/// Looks up subject metadata. Without it nothing else can run, so a failed
/// lookup is the one phase failure that ends the agentic run.
pub struct ContextGathering;

#[async_trait]
impl PhaseHandler for ContextGathering {
    fn phase(&self) -> PhaseType {
        PhaseType::ContextGathering
    }

    async fn run(
        &self,
        ctx: &mut PhaseContext<'_>,
        state: &SessionState,
    ) -> Result<PhaseResult, PhaseError> {
        let mut result = ctx.result();
        if let Some(context) = &state.context {
            tracing::debug!(session_id = %ctx.session_id, "Context already present");
            result.reasoning = Some(format!("reusing context for {}", context.subject_id));
            return Ok(result);
        }

        let exec = ctx.execution_context();
        let outcome = ctx
            .tools
            .call(SUBJECT_METADATA, json!({ "subject_id": state.subject_id }), &exec)
            .await;
        ctx.fold_tool_outcome(&outcome, &mut result);

        match outcome.result {
            Ok(response) => match response.output {
                ToolOutput::SubjectContext { context } => {
                    tracing::info!(
                        session_id = %ctx.session_id,
                        subject_id = %context.subject_id,
                        outperformance = ?context.outperformance(),
                        "Gathered subject context"
                    );
                    result.update.context = Some(context);
                    Ok(result)
                }
                other => Err(PhaseError::unrecoverable(
                    self.phase(),
                    format!("{} returned a {} payload", SUBJECT_METADATA, other.kind()),
                )),
            },
            Err(e) => Err(PhaseError::unrecoverable(self.phase(), e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::phases::harness::{run_phase, tracker};
    use crate::agents::testing::{MockBackend, MockTools};
    use crate::session::{SessionId, SubjectContext};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_gathers_context() {
        let state = SessionState::new(SessionId::new(), "vid");
        let mut budget = tracker();
        let result = run_phase(&ContextGathering, &state, &mut budget, Arc::new(MockTools::new()), Arc::new(MockBackend::new()))
            .await
            .unwrap();

        let context = result.update.context.unwrap();
        assert_eq!(context.subject_id, "vid");
        assert_eq!(context.outperformance(), Some(9.0));
        assert_eq!(budget.usage().tool_calls, 1);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_unrecoverable() {
        let state = SessionState::new(SessionId::new(), "vid");
        let mut budget = tracker();
        let tools = Arc::new(MockTools::new().failing(SUBJECT_METADATA));
        let err = run_phase(&ContextGathering, &state, &mut budget, tools, Arc::new(MockBackend::new()))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), PhaseType::ContextGathering);
        // the failed attempt is still charged
        assert_eq!(budget.usage().tool_calls, 1);
    }

    #[tokio::test]
    async fn test_existing_context_skips_lookup() {
        let mut state = SessionState::new(SessionId::new(), "vid");
        state.context = Some(SubjectContext {
            subject_id: "vid".into(),
            ..Default::default()
        });
        let tools = Arc::new(MockTools::new());
        let mut budget = tracker();
        let result = run_phase(&ContextGathering, &state, &mut budget, tools.clone(), Arc::new(MockBackend::new()))
            .await
            .unwrap();
        assert!(result.update.context.is_none());
        assert_eq!(tools.calls(SUBJECT_METADATA), 0);
    }
}
