//! Budget module - resource ceilings and capability-tier pricing.
//!
//! # Key Concepts
//! - Caps: six hard ceilings fixed when a run starts
//! - Tracker: counts consumption against the caps and answers "can this proceed"
//! - Pricing: context window and per-1K-token price of each capability tier

mod pricing;
mod tracker;

pub use pricing::{CapabilityTier, TierProfile};
pub use tracker::{
    BudgetCaps, BudgetRemaining, BudgetSnapshot, BudgetTracker, BudgetUsage, OperationKind,
    TierCosts,
};
