//! poly-converge: Convergence trading bot for Polymarket binary markets
//!
//! This library provides the core components for:
//! - Account state synchronization with a staleness policy
//! - Idempotent, safety-checked order execution (CLOB, paper, dry-run)
//! - Reconciliation of the local ledger against the venue
//! - Entry/exit evaluation for the convergence heuristic
//! - Position sizing and exposure limits
//! - SQLite ledger of orders, trades and run snapshots
//! - Market discovery via Gamma API
//! - Full observability stack

pub mod account;
pub mod cli;
pub mod config;
pub mod degraded;
pub mod execution;
pub mod ledger;
pub mod market;
pub mod orchestrator;
pub mod reconcile;
pub mod risk;
pub mod strategy;
pub mod telemetry;
