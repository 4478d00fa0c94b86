//! Ledger record types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::strategy::{ExitReason, Side};

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Buy,
    Sell,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Buy => "buy",
            OrderDirection::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderDirection::Buy),
            "sell" => Ok(OrderDirection::Sell),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// Lifecycle of a tracked order
///
/// `created -> submitted -> filled | failed | cancelled`, forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Submitted,
    Filled,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Filled => "filled",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// No further transitions allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Failed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "submitted" => Ok(OrderStatus::Submitted),
            "filled" => Ok(OrderStatus::Filled),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Local status of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Filled locally, not yet confirmed by the venue
    Pending,
    Open,
    Closed,
    Cancelled,
    /// Local record with no venue counterpart; needs a human
    Unknown,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TradeStatus::Pending),
            "open" => Ok(TradeStatus::Open),
            "closed" => Ok(TradeStatus::Closed),
            "cancelled" => Ok(TradeStatus::Cancelled),
            "unknown" => Ok(TradeStatus::Unknown),
            other => Err(format!("unknown trade status: {}", other)),
        }
    }
}

/// Durable record of one order attempt, keyed by idempotency key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTrackingRecord {
    pub idempotency_key: String,
    pub external_order_id: Option<String>,
    pub market_id: String,
    pub token_id: String,
    pub direction: OrderDirection,
    pub price: Decimal,
    /// USD for buys, shares for sells
    pub size: Decimal,
    pub status: OrderStatus,
    pub error_message: Option<String>,
    /// Rejection code of a failed attempt
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

/// Fields supplied when an order attempt is first recorded
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub idempotency_key: String,
    pub market_id: String,
    pub token_id: String,
    pub direction: OrderDirection,
    pub price: Decimal,
    pub size: Decimal,
}

/// A position as the bot remembers it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub size_usd: Decimal,
    pub shares: Decimal,
    pub status: TradeStatus,
    pub pnl: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub note: Option<String>,
    /// Idempotency key of the order that opened it
    pub order_key: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a trade is first recorded
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub size_usd: Decimal,
    pub shares: Decimal,
    pub status: TradeStatus,
    pub note: Option<String>,
    pub order_key: Option<String>,
    pub entry_time: DateTime<Utc>,
}

/// Append-only account snapshot written by each check cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub timestamp: DateTime<Utc>,
    pub balance: Decimal,
    pub total_exposure: Decimal,
    pub open_positions_count: i64,
    pub open_orders_count: i64,
}
