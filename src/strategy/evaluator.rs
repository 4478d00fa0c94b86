//! Opportunity evaluator
//!
//! Pure decision logic: which markets qualify for entry and when a held
//! position should be closed. Holds only the per-market phase of the
//! current run; no I/O.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

use super::types::{EntrySignal, ExitReason, ExitSignal, HeldPosition, MarketPhase, ResolutionInfo, Side};
use crate::config::StrategyConfig;
use crate::market::MarketData;

const SECONDS_PER_DAY: Decimal = dec!(86400);

/// Fractional days between `now` and `end_date` (negative once past)
pub fn days_until(end_date: DateTime<Utc>, now: DateTime<Utc>) -> Decimal {
    Decimal::from((end_date - now).num_seconds()) / SECONDS_PER_DAY
}

/// Profit of a position bought for `size_usd` at `entry_price` and sold at `exit_price`
///
/// No fees or slippage.
pub fn calculate_pnl(size_usd: Decimal, entry_price: Decimal, exit_price: Decimal) -> Decimal {
    if entry_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let shares = size_usd / entry_price;
    shares * exit_price - size_usd
}

/// Evaluates markets against the convergence rules and tracks phases
pub struct OpportunityEvaluator {
    config: StrategyConfig,
    phases: HashMap<String, MarketPhase>,
}

impl OpportunityEvaluator {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            phases: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Check whether a market qualifies right now, ignoring run history
    pub fn qualify(&self, market: &MarketData, now: DateTime<Utc>) -> Option<EntrySignal> {
        if !market.is_binary() || !market.active || market.closed {
            return None;
        }
        let end_date = market.end_date?;

        let days = days_until(end_date, now);
        if days < self.config.min_days || days > self.config.max_days {
            return None;
        }

        let mut sides = vec![Side::Yes];
        if self.config.allow_no_side {
            sides.push(Side::No);
        }

        sides.into_iter().find_map(|side| {
            let price = side.price_from_yes(market.yes_price);
            self.in_band(price).then(|| EntrySignal {
                market_id: market.market_id.clone(),
                token_id: market.token_for(side).to_string(),
                side,
                price,
                days_to_resolution: days,
                end_date,
            })
        })
    }

    /// Evaluate a market for entry and record its phase
    ///
    /// Markets already open or closed in this run never produce a signal.
    pub fn evaluate_entry(&mut self, market: &MarketData, now: DateTime<Utc>) -> Option<EntrySignal> {
        match self.phases.get(&market.market_id) {
            Some(MarketPhase::Open) | Some(MarketPhase::Closed(_)) => return None,
            _ => {}
        }

        let signal = self.qualify(market, now);
        let phase = match &signal {
            Some(s) => MarketPhase::Qualified(s.clone()),
            None => MarketPhase::Unqualified,
        };
        self.phases.insert(market.market_id.clone(), phase);
        signal
    }

    /// Decide whether a held position should be closed
    ///
    /// Priority: target (unless holding to resolution), stop-loss, resolution.
    pub fn check_exit_conditions(
        &self,
        position: &HeldPosition,
        side_price: Decimal,
        resolution: &ResolutionInfo,
        now: DateTime<Utc>,
    ) -> Option<ExitSignal> {
        if !self.config.hold_to_resolution && side_price >= self.config.target_price {
            return Some(ExitSignal {
                reason: ExitReason::Target,
                exit_price: side_price,
            });
        }

        if let Some(stop) = self.config.stop_loss {
            if side_price <= stop {
                return Some(ExitSignal {
                    reason: ExitReason::StopLoss,
                    exit_price: side_price,
                });
            }
        }

        if let (Some(end_date), Some(winner)) = (resolution.end_date, resolution.outcome) {
            if now >= end_date {
                let exit_price = if winner == position.side { Decimal::ONE } else { Decimal::ZERO };
                return Some(ExitSignal {
                    reason: ExitReason::Resolution,
                    exit_price,
                });
            }
        }

        None
    }

    /// Record that an entry for this market was filled
    pub fn mark_open(&mut self, market_id: &str) {
        if !self.is_closed(market_id) {
            self.phases.insert(market_id.to_string(), MarketPhase::Open);
        }
    }

    /// Record that the position in this market was closed
    pub fn mark_closed(&mut self, market_id: &str, reason: ExitReason) {
        self.phases.insert(market_id.to_string(), MarketPhase::Closed(reason));
    }

    pub fn is_closed(&self, market_id: &str) -> bool {
        matches!(self.phases.get(market_id), Some(MarketPhase::Closed(_)))
    }

    pub fn phase(&self, market_id: &str) -> MarketPhase {
        self.phases
            .get(market_id)
            .cloned()
            .unwrap_or(MarketPhase::Unqualified)
    }

    fn in_band(&self, price: Decimal) -> bool {
        price >= self.config.min_price && price <= self.config.max_price
    }
}
