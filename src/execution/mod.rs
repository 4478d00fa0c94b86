//! Execution module
//!
//! Venue contract, venue implementations (CLOB and paper) and the
//! safety-checked executor that sits in front of them.

mod clob;
mod executor;
mod idempotency;
mod inflight;
mod paper;
mod types;

pub use clob::{ClobVenue, L2Auth, OrderSigner, ReadOnlySigner, RemoteSigner, SignOrderRequest};
pub use executor::{ExecutionError, SafetyCheckedExecutor};
pub use idempotency::derive_idempotency_key;
pub use inflight::{InFlightGuard, InFlightRegistry};
pub use paper::PaperVenue;
pub use types::{MarketOrder, OrderAck, OrderIntent, OrderResult, RejectReason, VenueTrade};

pub use crate::ledger::OrderDirection;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::account::OrderRef;

/// Venue errors
#[derive(Debug, Error)]
pub enum VenueError {
    /// The venue understood the order and refused it
    #[error("Order rejected: {0}")]
    Rejected(String),
    /// The request did not complete; the outcome is unknown
    #[error("Transport error: {0}")]
    Transport(String),
    /// Upstream answered with an error status
    #[error("Venue API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Malformed venue response: {0}")]
    Malformed(String),
    #[error("Signing failed: {0}")]
    Signing(String),
}

impl VenueError {
    /// A business refusal rather than a failure to communicate
    pub fn is_rejection(&self) -> bool {
        matches!(self, VenueError::Rejected(_))
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        VenueError::Transport(e.to_string())
    }
}

/// Trait for trading venue implementations
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Venue name for logging
    fn name(&self) -> &str;
    /// Submit an immediate-or-cancel market order
    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, VenueError>;
    /// Cancel every resting order; returns how many were cancelled
    async fn cancel_all(&self) -> Result<usize, VenueError>;
    async fn list_open_orders(&self) -> Result<Vec<OrderRef>, VenueError>;
    /// Collateral balance held at the venue, in USD
    async fn get_balance(&self) -> Result<Decimal, VenueError>;
    /// Fill history of this account
    async fn list_trades(&self) -> Result<Vec<VenueTrade>, VenueError>;
}
