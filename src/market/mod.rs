//! Market data module
//!
//! Market discovery and price history behind an interchangeable source
//! contract, with primary/fallback selection.

mod gamma;
mod manager;

pub use gamma::{GammaClient, GammaConfig};
pub use manager::DataSourceManager;

use crate::strategy::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Market data errors
#[derive(Debug, Error)]
pub enum MarketDataError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Upstream answered with an error status
    #[error("API error: {0}")]
    Api(String),
    /// Response could not be interpreted
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// No configured source is reachable
    #[error("No market data source available")]
    NoSourceAvailable,
}

/// A binary prediction market as seen by the evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    /// Condition identifier
    pub market_id: String,
    /// Market question
    pub question: String,
    /// Outcome labels, in token order
    pub outcomes: Vec<String>,
    /// YES token identifier
    pub yes_token_id: String,
    /// NO token identifier
    pub no_token_id: String,
    /// Last YES price
    pub yes_price: Decimal,
    /// Resolution date, when known
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    /// Winning side once the market has resolved
    pub resolved_outcome: Option<Side>,
}

impl MarketData {
    /// Two outcomes with a token for each
    pub fn is_binary(&self) -> bool {
        self.outcomes.len() == 2 && !self.yes_token_id.is_empty() && !self.no_token_id.is_empty()
    }

    /// Token traded for the given side
    pub fn token_for(&self, side: Side) -> &str {
        match side {
            Side::Yes => &self.yes_token_id,
            Side::No => &self.no_token_id,
        }
    }
}

/// A single observed YES price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// Query filter for market discovery
#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    /// Only active, unclosed markets
    pub active_only: bool,
    /// Restrict to these condition ids
    pub market_ids: Option<Vec<String>>,
    /// Markets resolving no later than this
    pub end_before: Option<DateTime<Utc>>,
    /// Maximum number of markets returned
    pub limit: Option<usize>,
}

/// Trait for market data source implementations
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &str;
    /// Fetch markets matching the filter
    async fn fetch_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketData>, MarketDataError>;
    /// Fetch the YES price history of a market
    async fn fetch_price_history(&self, market: &MarketData) -> Result<Vec<PricePoint>, MarketDataError>;
    /// Cheap reachability check
    async fn is_available(&self) -> bool;
    /// Batch capability, if this source supports it
    fn as_batch(&self) -> Option<&dyn BatchFetchable> {
        None
    }
}

/// Optional capability: fetch many price histories in one call
#[async_trait]
pub trait BatchFetchable: Send + Sync {
    async fn fetch_price_history_batch(
        &self,
        markets: &[MarketData],
    ) -> Result<Vec<(String, Vec<PricePoint>)>, MarketDataError>;
}
