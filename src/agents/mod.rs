//! Agents module - the agentic investigation.
//!
//! # Components
//! - **Orchestrator**: runs one investigation end to end, including the
//!   deterministic fallback
//! - **Phase handlers**: one per [`PhaseType`], each a bounded unit of work
//!   that proposes a [`SessionUpdate`](crate::session::SessionUpdate)
//! - **Transition**: pure function picking the next phase
//!
//! # Design Principles
//! - Handlers never write session state; the orchestrator merges their updates
//! - Handlers never pick their tier; the router does, before each phase
//! - Only unrecoverable failures leave a handler as `Err`

mod context;
mod orchestrator;
mod phases;
mod transition;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{summarize_state, PhaseContext, PhaseHandler};
pub use orchestrator::{InvestigationRequest, Orchestrator};
pub use phases::{
    ContextGathering, Enrichment, Finalization, HypothesisGeneration, PhaseHandlers,
    SearchPlanning, Validation,
};
pub use transition::{next_transition, Transition, MIN_VALIDATED};
pub use types::{ForcedReason, PhaseError, PhaseResult, PhaseType};
