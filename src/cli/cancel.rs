//! Cancel-all command implementation

use clap::Args;

use super::AppContext;
use crate::config::{Config, ExecutionMode};

#[derive(Args, Debug)]
pub struct CancelAllArgs {
    /// Cancel for real; without it the resting orders are only listed
    #[arg(long)]
    pub live: bool,
}

impl CancelAllArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mode = if self.live {
            ExecutionMode::Live
        } else {
            ExecutionMode::DryRun
        };
        let ctx = AppContext::build(config, mode).await?;

        if mode == ExecutionMode::DryRun {
            let orders = ctx.venue.list_open_orders().await?;
            println!("{} open order(s) on {} (dry run, nothing cancelled)", orders.len(), ctx.venue.name());
            for order in &orders {
                println!(
                    "  {} {} {} {} @ {}",
                    order.order_id,
                    order.market_id,
                    order.direction.as_str(),
                    order.original_size - order.size_matched,
                    order.price
                );
            }
            return Ok(());
        }

        let cancelled = ctx.executor.cancel_all_orders().await?;
        println!("Cancelled {} open order(s) on {}", cancelled, ctx.venue.name());
        Ok(())
    }
}
