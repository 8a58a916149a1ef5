//! Run-level errors.

use thiserror::Error;

use crate::agents::PhaseError;
use crate::pipeline::PipelineError;
use crate::session::SessionError;

/// Failure that ends a run. Carried to the caller as a [`RunFailure`]
/// through [`code`](Self::code) and `Display`.
///
/// [`RunFailure`]: crate::report::RunFailure
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Phase(#[from] PhaseError),

    #[error("Deterministic pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("No handler registered for phase {0}")]
    MissingHandler(crate::agents::PhaseType),
}

impl OrchestratorError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Session(_) => "session_error",
            Self::Phase(_) => "phase_failed",
            Self::Pipeline(_) => "pipeline_failed",
            Self::MissingHandler(_) => "missing_handler",
        }
    }
}
