//! Slipforge — phase-aware betting slip engine
//!
//! Turns a daily pool of player propositions into staked multi-leg slips:
//!
//! 1. **Identity anonymization**: raw player names become stable anonymous
//!    UUIDs before anything else touches them.
//! 2. **Phase tracking**: physiological-cycle observations adjust each leg's
//!    win confidence for the target date.
//! 3. **Slip construction**: filtered propositions are bundled into
//!    all-or-nothing and partial-credit slips, positive-EV only.
//! 4. **Kelly staking**: stakes sized by a divisor-damped Kelly fraction
//!    under per-bet and portfolio exposure caps.
//! 5. **Guard rail**: a batch below the daily minimum is rejected outright.

pub mod config;
pub mod errors;
pub mod expr;
pub mod guardrail;
pub mod identity;
pub mod phase;
pub mod pipeline;
pub mod slips;
pub mod staking;
pub mod store;
pub mod types;

pub use config::Config;
pub use errors::EngineError;
pub use guardrail::GuardRail;
pub use identity::IdentityResolver;
pub use phase::PhaseTracker;
pub use pipeline::{DailyBatch, GenerateOptions, Pipeline, RawProposition};
pub use slips::SlipBuilder;
pub use staking::StakingEngine;
pub use store::JsonStore;
pub use types::{Odds, Phase, Proposition, Side, Slip, SlipArchetype};
