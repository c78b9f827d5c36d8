//! Bastion Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes equity, positions and prices → returns sizes and order parameters.

#![warn(clippy::all)]

pub mod error;
pub mod protection;
pub mod sizing;

pub use error::{EngineError, EngineResult};
pub use protection::{
    initial_stop, plan_candidate, refreshed_stop, round_down, round_quantity, take_profit,
    ProtectionPlan, ProtectionPolicy,
};
pub use sizing::{
    compute_size, kelly_fraction, safety_cap, CapBand, KellyBounds, KellyInputs, SizingDecision,
    SizingPolicy, SizingReason, SizingTier,
};
