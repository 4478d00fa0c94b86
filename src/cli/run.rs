//! Run command implementation

use clap::Args;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::AppContext;
use crate::config::{Config, ExecutionMode};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Submit real orders
    #[arg(long, conflicts_with = "paper")]
    pub live: bool,

    /// Submit to the simulated venue
    #[arg(long)]
    pub paper: bool,

    /// Run one check and one scan cycle, then exit
    #[arg(long)]
    pub once: bool,
}

impl RunArgs {
    /// Mode from the flags, falling back to the configured mode
    pub fn mode(&self, config: &Config) -> ExecutionMode {
        if self.live {
            ExecutionMode::Live
        } else if self.paper {
            ExecutionMode::Paper
        } else {
            config.execution.mode
        }
    }

    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mode = self.mode(config);
        let ctx = AppContext::build(config, mode).await?;
        let orchestrator = Arc::new(ctx.orchestrator(config)?);

        if self.once {
            let (check, scan) = orchestrator.run_once().await;
            if let Some(check) = check {
                println!("{}", serde_json::to_string_pretty(&check)?);
            }
            if let Some(scan) = scan {
                println!("{}", serde_json::to_string_pretty(&scan)?);
            }
            for error in orchestrator.recent_errors() {
                eprintln!("[{}] {}: {}", error.at.format("%H:%M:%S"), error.cycle.as_str(), error.message);
            }
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let halting = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                if let Err(e) = halting.halt().await {
                    warn!(error = %e, "Cancelling open orders on shutdown failed");
                }
                let _ = shutdown_tx.send(true);
            }
        });

        orchestrator.run(shutdown_rx).await;
        Ok(())
    }
}
