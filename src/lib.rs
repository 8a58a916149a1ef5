//! # Outlier Probe
//!
//! Bounded investigation of why a piece of content outperformed its
//! baseline.
//!
//! This library provides:
//! - An agentic investigation that runs a fixed set of phases under hard
//!   budget caps, routing each phase to a capability tier
//! - A deterministic pipeline used on its own or as the fallback
//! - Mode selection that learns from past runs
//! - Streaming progress events for dashboards
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────┐
//!  request ─────►│     Orchestrator     │──────► InvestigationResult
//!                └──┬────────┬───────┬──┘
//!                   │        │       │
//!          ┌────────▼──┐ ┌───▼────┐ ┌▼──────────────┐
//!          │ModeSelector│ │ Router │ │SessionManager │
//!          └────────────┘ └───┬────┘ └───────────────┘
//!                             │ tier
//!              ┌──────────────▼──────────────┐
//!              │ phase handlers / pipeline   │
//!              └──────┬───────────────┬──────┘
//!                     │               │
//!              ┌──────▼─────┐  ┌──────▼───────────┐
//!              │ ToolCaller │  │ BackendCaller    │
//!              └────────────┘  └──────────────────┘
//!                     ▲               ▲
//!                     └── BudgetTracker charges every call
//! ```
//!
//! ## Run Flow
//! 1. Select a mode from the caller's factors
//! 2. Agentic: context, hypothesis, search, enrichment, validation (repeated
//!    while more evidence is needed), finalization
//! 3. Any cap reached forces finalization with what has been gathered
//! 4. A failed agentic run falls back to the deterministic pipeline
//!
//! ## Modules
//! - `agents`: orchestrator, phase handlers and the transition function
//! - `budget`: caps, usage tracking and tier pricing
//! - `session`: investigation state, merge rule, compaction and the store
//! - `routing`: phase-to-tier routing
//! - `mode`: agentic versus deterministic selection
//! - `tools` / `llm`: the two external boundaries

pub mod agents;
pub mod budget;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod mode;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod routing;
pub mod session;
pub mod tools;
pub mod util;

pub use agents::{InvestigationRequest, Orchestrator, PhaseType};
pub use budget::{BudgetCaps, BudgetTracker, BudgetUsage, CapabilityTier};
pub use config::{RunConfig, ServiceConfig};
pub use error::OrchestratorError;
pub use events::{EventSink, ProgressEvent};
pub use llm::CapabilityBackend;
pub use mode::{InvestigationMode, ModeSelectionFactors, ModeSelector};
pub use report::{FinalReport, InvestigationResult};
pub use session::{SessionId, SessionManager};
pub use tools::ToolInvoker;
