//! Routing module - assigns investigation phases to capability tiers.

mod router;

pub use crate::budget::{CapabilityTier, TierProfile};
pub use router::{
    estimate_state_tokens, phase_token_estimate, CapabilityRouter, RouterConfig, RoutingDecision,
};
