//! Execution types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ledger::OrderDirection;
use crate::strategy::Side;

/// What the strategy wants to trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    /// USD to spend on a buy
    pub size_usd: Decimal,
    /// Shares to sell; required for sells
    pub shares: Option<Decimal>,
    /// Worst acceptable price
    pub limit_price: Option<Decimal>,
    /// Overrides the derived key when set
    pub idempotency_key: Option<String>,
}

impl OrderIntent {
    pub fn buy(market_id: impl Into<String>, token_id: impl Into<String>, side: Side, size_usd: Decimal) -> Self {
        Self {
            market_id: market_id.into(),
            token_id: token_id.into(),
            side,
            size_usd,
            shares: None,
            limit_price: None,
            idempotency_key: None,
        }
    }

    pub fn sell(
        market_id: impl Into<String>,
        token_id: impl Into<String>,
        side: Side,
        shares: Decimal,
        size_usd: Decimal,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            token_id: token_id.into(),
            side,
            size_usd,
            shares: Some(shares),
            limit_price: None,
            idempotency_key: None,
        }
    }

    pub fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Stable rejection codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A position or open order already exists in the market
    DuplicatePosition,
    /// Another order for the market is being placed
    InFlight,
    /// The order would push exposure past the ceiling
    ExposureLimit,
    InsufficientBalance,
    /// No fresh account state to check against
    StateUnavailable,
    /// The venue refused the order
    VenueRejected,
    /// An earlier attempt with this key has not finished
    InProgress,
    /// An earlier attempt with this key failed
    PreviouslyFailed,
    /// The intent itself is malformed
    InvalidIntent,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::DuplicatePosition => "duplicate_position",
            RejectReason::InFlight => "in_flight",
            RejectReason::ExposureLimit => "exposure_limit",
            RejectReason::InsufficientBalance => "insufficient_balance",
            RejectReason::StateUnavailable => "state_unavailable",
            RejectReason::VenueRejected => "venue_rejected",
            RejectReason::InProgress => "in_progress",
            RejectReason::PreviouslyFailed => "previously_failed",
            RejectReason::InvalidIntent => "invalid_intent",
        }
    }
}

impl FromStr for RejectReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate_position" => Ok(RejectReason::DuplicatePosition),
            "in_flight" => Ok(RejectReason::InFlight),
            "exposure_limit" => Ok(RejectReason::ExposureLimit),
            "insufficient_balance" => Ok(RejectReason::InsufficientBalance),
            "state_unavailable" => Ok(RejectReason::StateUnavailable),
            "venue_rejected" => Ok(RejectReason::VenueRejected),
            "in_progress" => Ok(RejectReason::InProgress),
            "previously_failed" => Ok(RejectReason::PreviouslyFailed),
            "invalid_intent" => Ok(RejectReason::InvalidIntent),
            other => Err(format!("unknown reject reason: {}", other)),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a `place_order` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResult {
    pub success: bool,
    pub external_order_id: Option<String>,
    pub error: Option<String>,
    pub reason: Option<RejectReason>,
    pub idempotency_key: String,
    /// Passed every check but was not submitted
    pub dry_run: bool,
}

impl OrderResult {
    pub fn filled(key: impl Into<String>, external_order_id: Option<String>) -> Self {
        Self {
            success: true,
            external_order_id,
            error: None,
            reason: None,
            idempotency_key: key.into(),
            dry_run: false,
        }
    }

    pub fn rejected(key: impl Into<String>, reason: RejectReason, error: impl Into<String>) -> Self {
        Self {
            success: false,
            external_order_id: None,
            error: Some(error.into()),
            reason: Some(reason),
            idempotency_key: key.into(),
            dry_run: false,
        }
    }

    pub fn dry_run(key: impl Into<String>) -> Self {
        Self {
            success: true,
            external_order_id: None,
            error: None,
            reason: None,
            idempotency_key: key.into(),
            dry_run: true,
        }
    }
}

/// Order as sent to a venue
#[derive(Debug, Clone, Serialize)]
pub struct MarketOrder {
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub direction: OrderDirection,
    /// USD for buys, shares for sells
    pub amount: Decimal,
    pub limit_price: Option<Decimal>,
    /// Client reference, the idempotency key
    pub client_ref: String,
}

/// Venue acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    /// Venue status string, e.g. "matched" or "live"
    pub status: Option<String>,
    pub avg_price: Option<Decimal>,
    pub filled_shares: Option<Decimal>,
}

/// A fill reported by the venue's trade history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueTrade {
    pub trade_id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub direction: OrderDirection,
    pub price: Decimal,
    /// Shares
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
}
