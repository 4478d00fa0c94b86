//! Strategy module
//!
//! Convergence heuristic: entry qualification, exit rules and the
//! per-market phase machine.

mod evaluator;
mod types;

pub use evaluator::{calculate_pnl, days_until, OpportunityEvaluator};
pub use types::{EntrySignal, ExitReason, ExitSignal, HeldPosition, MarketPhase, ResolutionInfo, Side};
