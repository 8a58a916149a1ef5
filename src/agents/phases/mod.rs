//! The six phase handlers.
//!
//! | Phase | Work | Budget gate |
//! |---|---|---|
//! | context gathering | subject metadata lookup | none |
//! | hypothesis generation | backend hypothesis | none |
//! | search planning | backend plan, then similarity fan-out | `record_fanout` |
//! | enrichment | per-candidate lookups | remaining tool calls |
//! | validation | batch scoring, then backend verdict | `record_validation` |
//! | finalization | backend report draft | none |

mod context;
mod enrichment;
mod finalization;
mod hypothesis;
mod search;
mod validation;

pub use context::ContextGathering;
pub use enrichment::Enrichment;
pub use finalization::Finalization;
pub use hypothesis::HypothesisGeneration;
pub use search::SearchPlanning;
pub use validation::Validation;

use std::collections::HashMap;
use std::sync::Arc;

use super::context::PhaseHandler;
use super::types::PhaseType;

/// Handler lookup by phase.
#[derive(Clone)]
pub struct PhaseHandlers {
    handlers: HashMap<PhaseType, Arc<dyn PhaseHandler>>,
}

impl PhaseHandlers {
    /// Replace the handler for its phase.
    pub fn with(mut self, handler: Arc<dyn PhaseHandler>) -> Self {
        self.handlers.insert(handler.phase(), handler);
        self
    }

    pub fn get(&self, phase: PhaseType) -> Option<Arc<dyn PhaseHandler>> {
        self.handlers.get(&phase).cloned()
    }
}

impl Default for PhaseHandlers {
    fn default() -> Self {
        let all: [Arc<dyn PhaseHandler>; 6] = [
            Arc::new(ContextGathering),
            Arc::new(HypothesisGeneration),
            Arc::new(SearchPlanning::default()),
            Arc::new(Enrichment::default()),
            Arc::new(Validation::default()),
            Arc::new(Finalization),
        ];
        Self {
            handlers: all.into_iter().map(|h| (h.phase(), h)).collect(),
        }
    }
}
