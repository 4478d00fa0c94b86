//! Status command implementation

use clap::Args;

use crate::config::Config;
use crate::ledger::{LedgerStore, TradeStatus};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Number of recent orders to show
    #[arg(long, default_value_t = 10)]
    pub orders: i64,
}

impl StatusArgs {
    /// Report from the ledger alone; the venue is not contacted
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let ledger = LedgerStore::open(&config.ledger.url).await?;

        println!("poly-converge status");
        println!("  Mode: {}", config.execution.mode);
        println!("  Ledger: {}", config.ledger.url);

        match ledger.latest_snapshot().await? {
            Some(s) => println!(
                "  Last snapshot: {} balance ${} exposure ${} positions {} orders {}",
                s.timestamp.to_rfc3339(),
                s.balance.round_dp(2),
                s.total_exposure.round_dp(2),
                s.open_positions_count,
                s.open_orders_count
            ),
            None => println!("  Last snapshot: none"),
        }

        println!("  Trades:");
        for (status, count) in ledger.trade_status_counts().await? {
            println!("    {:<10} {}", status.as_str(), count);
        }
        println!("  Realized PnL: ${}", ledger.realized_pnl().await?.round_dp(2));

        let unknown = ledger.trades_by_status(TradeStatus::Unknown).await?;
        if !unknown.is_empty() {
            println!("  Needs attention ({} unknown):", unknown.len());
            for trade in unknown {
                println!(
                    "    {} {} {} ${} {}",
                    trade.id,
                    trade.market_id,
                    trade.side,
                    trade.size_usd.round_dp(2),
                    trade.note.unwrap_or_default()
                );
            }
        }

        println!("  Orders:");
        for (status, count) in ledger.order_status_counts().await? {
            println!("    {:<10} {}", status.as_str(), count);
        }
        for order in ledger.recent_orders(self.orders).await? {
            println!(
                "    {} {:<4} {} {} {}{}",
                order.created_at.format("%Y-%m-%d %H:%M:%S"),
                order.direction.as_str(),
                order.market_id,
                order.size,
                order.status,
                order.error_message.map(|e| format!(" ({})", e)).unwrap_or_default()
            );
        }
        Ok(())
    }
}
