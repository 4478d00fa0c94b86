//! Reconcile command implementation

use clap::Args;

use super::AppContext;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl ReconcileArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let ctx = AppContext::build(config, config.execution.mode).await?;
        let report = ctx.reconciler(config).reconcile().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Reconciliation at {}", report.checked_at.to_rfc3339());
        println!("  Synced:         {}", report.synced);
        println!("  Promoted:       {}", report.promoted);
        println!("  Marked unknown: {}", report.marked_unknown);
        println!("  Synthesized:    {}", report.synthesized);
        println!("  Skipped recent: {}", report.skipped_recent);
        for discrepancy in &report.discrepancies {
            println!("  - {}", discrepancy);
        }
        Ok(())
    }
}
