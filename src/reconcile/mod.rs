//! Ledger reconciliation
//!
//! Compares the ledger's live trades against a fresh read of the venue
//! account and repairs drift in both directions:
//!
//! - a local trade with no venue counterpart is marked `unknown`
//! - a venue position with no local trade gets one synthesized
//!
//! `unknown` trades are left for an operator; nothing here moves them back.

mod report;

pub use report::ReconcileReport;

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::account::{AccountSynchronizer, SyncError};
use crate::config::{ReconcileConfig, MAX_GRACE_PERIOD_SECS};
use crate::ledger::{LedgerError, LedgerStore, NewTrade, TradeStatus};
use crate::strategy::Side;
use crate::telemetry::{increment, record_latency, CounterMetric, LatencyMetric};

/// Note attached to trades created from venue positions
pub const DISCOVERED_NOTE: &str = "reconciled: discovered on venue";

/// Reconciliation errors; when one is returned nothing was changed
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Account state unavailable: {0}")]
    Sync(#[from] SyncError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Re-verifies the ledger against the venue
pub struct Reconciler {
    ledger: LedgerStore,
    sync: Arc<AccountSynchronizer>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(ledger: LedgerStore, sync: Arc<AccountSynchronizer>, config: ReconcileConfig) -> Self {
        Self { ledger, sync, config }
    }

    /// Run one reconciliation pass
    ///
    /// Requires a live account read; a cached fallback is refused.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let started = Instant::now();
        let state = self.sync.fresh_state().await?;
        let trades = self.ledger.open_trades().await?;

        let now = Utc::now();
        let grace = Duration::seconds(self.config.grace_period_secs.min(MAX_GRACE_PERIOD_SECS) as i64);
        let mut report = ReconcileReport::new(now);

        for trade in &trades {
            if now - trade.created_at < grace {
                report.skipped_recent += 1;
                continue;
            }

            let position = state.position(&trade.market_id, trade.side);
            let has_order = state.has_open_order_for_market(&trade.market_id);

            match (position, trade.status) {
                (Some(_), TradeStatus::Pending) => {
                    self.ledger.mark_trade_open(&trade.id).await?;
                    report.promoted += 1;
                    debug!(trade_id = %trade.id, market_id = %trade.market_id, "Trade confirmed by venue");
                }
                (Some(_), _) => {}
                (None, _) if has_order => {
                    debug!(trade_id = %trade.id, market_id = %trade.market_id, "Trade backed by open order");
                }
                (None, _) => {
                    let message = format!(
                        "trade {} ({} {}) has no venue position or open order",
                        trade.id, trade.market_id, trade.side
                    );
                    self.ledger.mark_trade_unknown(&trade.id, &message).await?;
                    warn!(trade_id = %trade.id, market_id = %trade.market_id, side = %trade.side, "Trade missing on venue, marked unknown");
                    report.marked_unknown += 1;
                    report.discrepancy(message);
                }
            }
        }

        // Resolved positions stay on the venue until redeemed
        let settled = self.ledger.resolved_positions().await?;
        let tracked: HashSet<(&str, Side)> = trades
            .iter()
            .map(|t| (t.market_id.as_str(), t.side))
            .chain(settled.iter().map(|(market_id, side)| (market_id.as_str(), *side)))
            .collect();
        for position in &state.positions {
            if tracked.contains(&(position.market_id.as_str(), position.side)) {
                continue;
            }

            let trade = self
                .ledger
                .insert_trade(&NewTrade {
                    market_id: position.market_id.clone(),
                    token_id: position.token_id.clone(),
                    side: position.side,
                    entry_price: position.avg_entry_price,
                    size_usd: position.size * position.avg_entry_price,
                    shares: position.size,
                    status: TradeStatus::Open,
                    note: Some(DISCOVERED_NOTE.to_string()),
                    order_key: None,
                    entry_time: position.entry_time.unwrap_or(now),
                })
                .await?;
            warn!(
                trade_id = %trade.id,
                market_id = %position.market_id,
                side = %position.side,
                size = %position.size,
                "Venue position missing from ledger, trade synthesized"
            );
            report.synthesized += 1;
            report.discrepancy(format!(
                "venue position {} {} ({} shares) was not in the ledger",
                position.market_id, position.side, position.size
            ));
        }

        for _ in &report.discrepancies {
            increment(CounterMetric::Discrepancies, None);
        }
        record_latency(LatencyMetric::Reconcile, started.elapsed());

        info!(
            synced = report.synced,
            discrepancies = report.discrepancies.len(),
            promoted = report.promoted,
            marked_unknown = report.marked_unknown,
            synthesized = report.synthesized,
            "Reconciliation complete"
        );
        Ok(report)
    }
}
