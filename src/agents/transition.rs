//! Pure transition function of the phase state machine.
//!
//! ```text
//! context ─► hypothesis ─► search ─► enrichment ─► validation ─► finalization ─► complete
//!                                                   │    ▲
//!                                                   └────┘ repeat while more evidence is needed
//! any phase ── complete flag ──────────────────────────────────────────────────► complete
//! any phase ── forward jump directive ─► later phase
//! ```

use super::types::{PhaseResult, PhaseType};
use crate::session::SessionState;

/// Validated candidates below which another validation batch is worthwhile.
pub const MIN_VALIDATED: u32 = 10;

/// Where the state machine goes after a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Run(PhaseType),
    Complete,
}

/// Decide the next step from the finished phase and the merged state.
///
/// # Rules (first match wins)
/// 1. `complete` short-circuits to result assembly
/// 2. validation that needs more, with candidates left and fewer than
///    [`MIN_VALIDATED`] validated, runs validation again
/// 3. a jump directive to a later phase is followed; backward jumps are ignored
/// 4. otherwise advance; after finalization the run is complete
pub fn next_transition(result: &PhaseResult, state: &SessionState) -> Transition {
    if result.complete {
        return Transition::Complete;
    }

    if result.phase == PhaseType::Validation
        && result.needs_more
        && state.candidate_count() > 0
        && state.validated_count() < MIN_VALIDATED
    {
        return Transition::Run(PhaseType::Validation);
    }

    if let Some(target) = result.next_phase {
        if target > result.phase {
            return Transition::Run(target);
        }
        tracing::warn!(
            from = %result.phase,
            to = %target,
            "Ignoring backward phase jump"
        );
    }

    match result.phase.next() {
        Some(next) => Transition::Run(next),
        None => Transition::Complete,
    }
}
