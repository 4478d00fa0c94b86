//! Account state module
//!
//! The bot's view of the external account: balance, open orders and
//! positions, with a staleness policy and typed degradation.

mod collateral;
mod positions;
mod replay;
mod synchronizer;

pub use collateral::PolygonRpc;
pub use positions::DataApiClient;
pub use replay::positions_from_trades;
pub use synchronizer::AccountSynchronizer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::execution::VenueError;
use crate::ledger::OrderDirection;
use crate::strategy::Side;

/// Account state errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// No live read succeeded and nothing is cached
    #[error("Account state unavailable: {0}")]
    Unavailable(String),
    /// Only a stale cached state is available for a decision that needs a fresh one
    #[error("Account state is stale ({age_secs}s old)")]
    StaleState { age_secs: i64 },
}

/// Where a state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateOrigin {
    /// Observed by a live fetch within the staleness threshold
    Live,
    /// Stale fallback served because a live fetch failed
    Cached,
}

/// How positions were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    DataApi,
    /// Derived from venue fill history; no entry time or title
    TradeReplay,
    Paper,
}

/// A position held at the venue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRef {
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    /// Shares
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub entry_time: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub provenance: PositionSource,
}

impl PositionRef {
    /// Current market value in USD
    pub fn market_value(&self) -> Decimal {
        self.size * self.current_price
    }
}

/// A resting order at the venue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRef {
    pub order_id: String,
    pub market_id: String,
    pub token_id: String,
    pub direction: OrderDirection,
    pub price: Decimal,
    pub original_size: Decimal,
    pub size_matched: Decimal,
}

impl OrderRef {
    /// USD still committed by the unmatched remainder
    pub fn notional(&self) -> Decimal {
        self.price * (self.original_size - self.size_matched).max(Decimal::ZERO)
    }
}

/// Point-in-time view of the account
#[derive(Debug, Clone, Serialize)]
pub struct AccountState {
    /// Effective balance: the larger of the two readings
    pub balance: Decimal,
    pub venue_balance: Option<Decimal>,
    pub onchain_balance: Option<Decimal>,
    pub open_orders: Vec<OrderRef>,
    pub positions: Vec<PositionRef>,
    pub position_source: PositionSource,
    pub observed_at: DateTime<Utc>,
    pub origin: StateOrigin,
}

impl AccountState {
    /// USD held by resting buys; resting sells commit shares, not cash
    pub fn open_order_notional(&self) -> Decimal {
        self.open_orders
            .iter()
            .filter(|o| o.direction == OrderDirection::Buy)
            .map(OrderRef::notional)
            .sum()
    }

    pub fn positions_value(&self) -> Decimal {
        self.positions.iter().map(PositionRef::market_value).sum()
    }

    /// Position market value plus open-order notional
    pub fn total_exposure(&self) -> Decimal {
        self.positions_value() + self.open_order_notional()
    }

    /// Balance not committed to open orders
    pub fn available_balance(&self) -> Decimal {
        self.balance - self.open_order_notional()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }

    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(threshold) {
            Ok(limit) => self.age(now) > limit,
            Err(_) => false,
        }
    }

    pub fn has_position_in_market(&self, market_id: &str) -> bool {
        self.positions.iter().any(|p| p.market_id == market_id)
    }

    pub fn has_open_order_for_market(&self, market_id: &str) -> bool {
        self.open_orders.iter().any(|o| o.market_id == market_id)
    }

    pub fn position(&self, market_id: &str, side: Side) -> Option<&PositionRef> {
        self.positions
            .iter()
            .find(|p| p.market_id == market_id && p.side == side)
    }
}

/// Source of held positions
#[async_trait]
pub trait PositionsService: Send + Sync {
    async fn fetch_positions(&self) -> Result<Vec<PositionRef>, VenueError>;
}

/// Source of an independent collateral balance reading
#[async_trait]
pub trait CollateralSource: Send + Sync {
    fn name(&self) -> &str;
    /// Balance in USD
    async fn fetch_balance(&self) -> Result<Decimal, VenueError>;
}
