//! Paper trading venue with simulated fills
//!
//! Market orders fill immediately and in full at the limit price, or at the
//! last mark for the token when no limit is given. No fees, no slippage.

use super::{ExecutionVenue, MarketOrder, OrderAck, VenueError, VenueTrade};
use crate::account::{OrderRef, PositionRef, PositionSource, PositionsService};
use crate::ledger::OrderDirection;
use crate::strategy::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct PaperPosition {
    market_id: String,
    side: Side,
    shares: Decimal,
    cost: Decimal,
    entry_time: DateTime<Utc>,
}

/// Failure to inject on the next submission
#[derive(Debug, Clone)]
enum InjectedFailure {
    Reject(String),
    Transport(String),
}

#[derive(Debug, Default)]
struct PaperBook {
    balance: Decimal,
    /// Keyed by token id
    positions: HashMap<String, PaperPosition>,
    marks: HashMap<String, Decimal>,
    trades: Vec<VenueTrade>,
    next_failure: Option<InjectedFailure>,
    balance_unavailable: bool,
}

/// Simulated venue used by paper mode and tests
pub struct PaperVenue {
    book: Arc<RwLock<PaperBook>>,
    submissions: AtomicUsize,
    cancels: AtomicUsize,
}

impl PaperVenue {
    /// Create a paper venue holding `balance` USD
    pub fn new(balance: Decimal) -> Self {
        Self {
            book: Arc::new(RwLock::new(PaperBook {
                balance,
                ..Default::default()
            })),
            submissions: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    /// Set the current price of a token
    pub async fn set_mark(&self, token_id: &str, price: Decimal) {
        self.book.write().await.marks.insert(token_id.to_string(), price);
    }

    /// Make the next submission fail with a business rejection
    pub async fn reject_next(&self, message: &str) {
        self.book.write().await.next_failure = Some(InjectedFailure::Reject(message.to_string()));
    }

    /// Make the next submission fail with a transport error
    pub async fn fail_next(&self, message: &str) {
        self.book.write().await.next_failure = Some(InjectedFailure::Transport(message.to_string()));
    }

    /// Make balance reads fail until cleared
    pub async fn set_balance_unavailable(&self, unavailable: bool) {
        self.book.write().await.balance_unavailable = unavailable;
    }

    /// Put a position on the book without a trade, as if opened elsewhere
    pub async fn seed_position(&self, market_id: &str, token_id: &str, side: Side, shares: Decimal, price: Decimal) {
        let mut book = self.book.write().await;
        book.marks.entry(token_id.to_string()).or_insert(price);
        book.positions.insert(
            token_id.to_string(),
            PaperPosition {
                market_id: market_id.to_string(),
                side,
                shares,
                cost: shares * price,
                entry_time: Utc::now(),
            },
        );
    }

    /// Remove a position from the book, as if closed elsewhere
    pub async fn drop_position(&self, token_id: &str) {
        self.book.write().await.positions.remove(token_id);
    }

    /// Number of orders that reached the venue
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of cancel-all requests received
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub async fn balance(&self) -> Decimal {
        self.book.read().await.balance
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, VenueError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let mut book = self.book.write().await;

        match book.next_failure.take() {
            Some(InjectedFailure::Reject(msg)) => return Err(VenueError::Rejected(msg)),
            Some(InjectedFailure::Transport(msg)) => return Err(VenueError::Transport(msg)),
            None => {}
        }

        if order.amount <= Decimal::ZERO {
            return Err(VenueError::Rejected("amount must be positive".to_string()));
        }

        let price = order
            .limit_price
            .or_else(|| book.marks.get(&order.token_id).copied())
            .ok_or_else(|| VenueError::Rejected(format!("no price for token {}", order.token_id)))?;
        if price <= Decimal::ZERO {
            return Err(VenueError::Rejected("price must be positive".to_string()));
        }

        let now = Utc::now();
        let shares = match order.direction {
            OrderDirection::Buy => {
                if order.amount > book.balance {
                    return Err(VenueError::Rejected("not enough balance".to_string()));
                }
                let shares = order.amount / price;
                book.balance -= order.amount;
                let position = book
                    .positions
                    .entry(order.token_id.clone())
                    .or_insert_with(|| PaperPosition {
                        market_id: order.market_id.clone(),
                        side: order.side,
                        shares: Decimal::ZERO,
                        cost: Decimal::ZERO,
                        entry_time: now,
                    });
                position.shares += shares;
                position.cost += order.amount;
                shares
            }
            OrderDirection::Sell => {
                let held = book.positions.get(&order.token_id).map(|p| p.shares).unwrap_or_default();
                if order.amount > held {
                    return Err(VenueError::Rejected(format!(
                        "not enough shares: have {}, selling {}",
                        held, order.amount
                    )));
                }
                book.balance += order.amount * price;
                let emptied = match book.positions.get_mut(&order.token_id) {
                    Some(position) => {
                        let avg = position.cost / position.shares;
                        position.shares -= order.amount;
                        position.cost = position.shares * avg;
                        position.shares.is_zero()
                    }
                    None => false,
                };
                if emptied {
                    book.positions.remove(&order.token_id);
                }
                order.amount
            }
        };

        book.marks.insert(order.token_id.clone(), price);
        let order_id = format!("paper-{}", uuid::Uuid::new_v4());
        book.trades.push(VenueTrade {
            trade_id: order_id.clone(),
            market_id: order.market_id.clone(),
            token_id: order.token_id.clone(),
            side: order.side,
            direction: order.direction,
            price,
            size: shares,
            timestamp: now,
        });

        tracing::info!(
            order_id = %order_id,
            market_id = %order.market_id,
            direction = %order.direction,
            %price,
            %shares,
            "Paper order filled"
        );

        Ok(OrderAck {
            order_id,
            status: Some("matched".to_string()),
            avg_price: Some(price),
            filled_shares: Some(shares),
        })
    }

    async fn cancel_all(&self) -> Result<usize, VenueError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        // Market orders never rest on the paper book
        Ok(0)
    }

    async fn list_open_orders(&self) -> Result<Vec<OrderRef>, VenueError> {
        Ok(Vec::new())
    }

    async fn get_balance(&self) -> Result<Decimal, VenueError> {
        let book = self.book.read().await;
        if book.balance_unavailable {
            return Err(VenueError::Transport("paper balance unavailable".to_string()));
        }
        Ok(book.balance)
    }

    async fn list_trades(&self) -> Result<Vec<VenueTrade>, VenueError> {
        Ok(self.book.read().await.trades.clone())
    }
}

#[async_trait]
impl PositionsService for PaperVenue {
    async fn fetch_positions(&self) -> Result<Vec<PositionRef>, VenueError> {
        let book = self.book.read().await;
        let mut positions: Vec<PositionRef> = book
            .positions
            .iter()
            .map(|(token_id, p)| {
                let avg = if p.shares.is_zero() { Decimal::ZERO } else { p.cost / p.shares };
                let current = book.marks.get(token_id).copied().unwrap_or(avg);
                PositionRef {
                    market_id: p.market_id.clone(),
                    token_id: token_id.clone(),
                    side: p.side,
                    size: p.shares,
                    avg_entry_price: avg,
                    current_price: current,
                    unrealized_pnl: p.shares * current - p.cost,
                    entry_time: Some(p.entry_time),
                    title: None,
                    provenance: PositionSource::Paper,
                }
            })
            .collect();
        positions.sort_by(|a, b| a.market_id.cmp(&b.market_id));
        Ok(positions)
    }
}
