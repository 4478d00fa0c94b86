//! CLI interface for poly-converge
//!
//! Provides subcommands for:
//! - `run`: Start the bot (dry-run unless `--paper` or `--live`)
//! - `reconcile`: One reconciliation pass against the venue
//! - `status`: Show ledger state
//! - `cancel-all`: Cancel every resting order at the venue
//! - `config`: Show the effective configuration

mod cancel;
mod context;
mod reconcile;
mod run;
mod status;

pub use cancel::CancelAllArgs;
pub use context::AppContext;
pub use reconcile::ReconcileArgs;
pub use run::RunArgs;
pub use status::StatusArgs;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "poly-converge")]
#[command(about = "Convergence trading bot for Polymarket binary markets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start trading
    Run(RunArgs),
    /// Reconcile the ledger against the venue once
    Reconcile(ReconcileArgs),
    /// Show ledger state
    Status(StatusArgs),
    /// Cancel every resting order at the venue
    CancelAll(CancelAllArgs),
    /// Show the effective configuration
    Config,
}

/// Print the effective configuration; credentials are never shown
pub fn print_config(config: &Config) {
    let s = &config.strategy;
    let r = &config.risk;
    println!("Effective configuration:");
    println!("  Execution: {}", config.execution.mode);
    println!(
        "  Strategy: price [{}, {}], days [{}, {}], target {}, stop {}, hold to resolution {}",
        s.min_price,
        s.max_price,
        s.min_days,
        s.max_days,
        s.target_price,
        s.stop_loss.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string()),
        s.hold_to_resolution
    );
    println!(
        "  Risk: ${} per entry, max {} positions, max exposure ${}, min order ${}",
        r.position_size_usd, r.max_positions, r.max_exposure_usd, r.min_order_usd
    );
    println!(
        "  Schedule: scan every {}s, check every {}s",
        config.scheduler.scan_interval_secs, config.scheduler.check_interval_secs
    );
    println!(
        "  Sync: staleness {}s, reconcile grace {}s",
        config.sync.staleness_secs, config.reconcile.grace_period_secs
    );
    println!("  Ledger: {}", config.ledger.url);
    println!("  Venue: {}", config.venue.clob_url);
}
