//! Mode module - agentic versus deterministic, decided once per run.

mod performance;
mod selector;
mod types;

pub use performance::ModePerformance;
pub use selector::{ModeSelector, ModeSelectorConfig, ModeStats, ModeStatsError};
pub use types::{InvestigationMode, ModeSelectionFactors, ModeSelectionResult};
