//! Safety-checked executor
//!
//! Every order passes through the same gates before it can reach a venue:
//!
//! 1. idempotency lookup in the ledger
//! 2. per-market in-flight slot
//! 3. no existing position or open order in the market (buys)
//! 4. exposure ceiling (buys)
//! 5. available balance (buys)
//!
//! A gate that fails returns an [`OrderResult`] with a reason code and
//! nothing is written or submitted. The `created` ledger row is written
//! before the venue is called, so a crash mid-submission leaves evidence.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    derive_idempotency_key, ExecutionVenue, InFlightRegistry, MarketOrder, OrderAck, OrderIntent, OrderResult,
    RejectReason, VenueError,
};
use crate::account::AccountSynchronizer;
use crate::config::{ExecutionConfig, ExecutionMode, RiskConfig};
use crate::ledger::{
    LedgerError, LedgerStore, NewOrder, NewTrade, OrderDirection, OrderStatus, OrderTrackingRecord, TradeStatus,
};
use crate::risk::ExposureLimits;
use crate::telemetry::{increment, record_latency, set_gauge, CounterMetric, GaugeMetric, LatencyMetric};

/// Execution errors
///
/// Business refusals are not errors; they come back as an unsuccessful
/// [`OrderResult`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The venue call failed without a business answer
    #[error("Venue error: {0}")]
    Venue(VenueError),
}

/// Places orders only after every safety gate passes
pub struct SafetyCheckedExecutor {
    ledger: LedgerStore,
    sync: Arc<AccountSynchronizer>,
    venue: Arc<dyn ExecutionVenue>,
    limits: ExposureLimits,
    config: ExecutionConfig,
    in_flight: InFlightRegistry,
}

impl SafetyCheckedExecutor {
    pub fn new(
        ledger: LedgerStore,
        sync: Arc<AccountSynchronizer>,
        venue: Arc<dyn ExecutionVenue>,
        risk: &RiskConfig,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            ledger,
            sync,
            venue,
            limits: ExposureLimits::from_config(risk),
            config,
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    /// Place an order for `intent`
    ///
    /// Returns `Err` only for ledger failures and venue failures with an
    /// unknown outcome. Both leave the ledger row `failed` when it exists.
    pub async fn place_order(
        &self,
        intent: &OrderIntent,
        direction: OrderDirection,
    ) -> Result<OrderResult, ExecutionError> {
        let key = intent.idempotency_key.clone().unwrap_or_else(|| {
            derive_idempotency_key(
                &intent.market_id,
                intent.side,
                direction,
                requested_amount(intent, direction),
                Utc::now().timestamp(),
                self.config.idempotency_bucket_secs,
            )
        });

        // Gate 1: a known key returns its stored outcome
        if let Some(record) = self.ledger.get_order(&key).await? {
            return Ok(replay(record));
        }

        let amount = match order_amount(intent, direction) {
            Ok(amount) => amount,
            Err(msg) => return Ok(self.reject(key, RejectReason::InvalidIntent, msg)),
        };

        // Gate 2: one order per market at a time; the slot carries the
        // exposure this order would add until it settles
        let reserved = match direction {
            OrderDirection::Buy => amount,
            OrderDirection::Sell => Decimal::ZERO,
        };
        let Some(_slot) = self.in_flight.try_acquire(&intent.market_id, reserved) else {
            return Ok(self.reject(
                key,
                RejectReason::InFlight,
                format!("order already in flight for market {}", intent.market_id),
            ));
        };
        set_gauge(GaugeMetric::InFlight, self.in_flight.len() as f64);

        if direction == OrderDirection::Buy {
            if let Some(rejection) = self.check_buy(intent, &key, amount).await {
                return Ok(rejection);
            }
        }

        if self.config.mode == ExecutionMode::DryRun {
            info!(
                key = %key,
                market_id = %intent.market_id,
                side = %intent.side,
                %direction,
                %amount,
                "Dry run: order passed all checks, not submitted"
            );
            return Ok(OrderResult::dry_run(key));
        }

        self.submit(intent, direction, amount, &key).await
    }

    /// Gates 3 to 5, all against one fresh account read
    async fn check_buy(&self, intent: &OrderIntent, key: &str, amount: Decimal) -> Option<OrderResult> {
        let state = match self.sync.fresh_state().await {
            Ok(state) => state,
            Err(e) => {
                return Some(self.reject(key, RejectReason::StateUnavailable, e.to_string()));
            }
        };

        if state.has_position_in_market(&intent.market_id) || state.has_open_order_for_market(&intent.market_id) {
            return Some(self.reject(
                key,
                RejectReason::DuplicatePosition,
                format!("position or open order already exists in market {}", intent.market_id),
            ));
        }

        let committed = state.total_exposure() + self.in_flight.reserved_excluding(&intent.market_id);
        if self.limits.would_exceed(committed, amount) {
            return Some(self.reject(
                key,
                RejectReason::ExposureLimit,
                format!(
                    "exposure {} + {} would exceed {}",
                    committed, amount, self.limits.max_exposure_usd
                ),
            ));
        }

        let available = state.available_balance();
        if available < amount {
            return Some(self.reject(
                key,
                RejectReason::InsufficientBalance,
                format!("available balance {} below order size {}", available, amount),
            ));
        }

        None
    }

    async fn submit(
        &self,
        intent: &OrderIntent,
        direction: OrderDirection,
        amount: Decimal,
        key: &str,
    ) -> Result<OrderResult, ExecutionError> {
        let new_order = NewOrder {
            idempotency_key: key.to_string(),
            market_id: intent.market_id.clone(),
            token_id: intent.token_id.clone(),
            direction,
            price: intent.limit_price.unwrap_or_default(),
            size: amount,
        };
        match self.ledger.insert_created(&new_order).await {
            Ok(_) => {}
            // Lost a race with another caller using the same key
            Err(LedgerError::DuplicateKey(_)) => {
                return match self.ledger.get_order(key).await? {
                    Some(record) => Ok(replay(record)),
                    None => Err(LedgerError::NotFound(key.to_string()).into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        let order = MarketOrder {
            market_id: intent.market_id.clone(),
            token_id: intent.token_id.clone(),
            side: intent.side,
            direction,
            amount,
            limit_price: intent.limit_price,
            client_ref: key.to_string(),
        };

        debug!(key = %key, venue = self.venue.name(), "Submitting order");
        let started = Instant::now();
        let outcome = self.venue.submit_market_order(&order).await;
        record_latency(LatencyMetric::OrderSubmission, started.elapsed());

        match outcome {
            Ok(ack) => self.record_success(intent, direction, amount, key, ack).await,
            Err(VenueError::Rejected(msg)) => {
                warn!(key = %key, market_id = %intent.market_id, error = %msg, "Venue rejected order");
                self.ledger
                    .mark_failed(key, &msg, Some(RejectReason::VenueRejected.as_str()))
                    .await?;
                increment(CounterMetric::OrdersRejected, Some(RejectReason::VenueRejected.as_str()));
                Ok(OrderResult::rejected(key, RejectReason::VenueRejected, msg))
            }
            Err(e) => {
                warn!(key = %key, market_id = %intent.market_id, error = %e, "Order submission failed");
                self.ledger.mark_failed(key, &e.to_string(), None).await?;
                increment(CounterMetric::OrdersFailed, None);
                Err(ExecutionError::Venue(e))
            }
        }
    }

    async fn record_success(
        &self,
        intent: &OrderIntent,
        direction: OrderDirection,
        amount: Decimal,
        key: &str,
        ack: OrderAck,
    ) -> Result<OrderResult, ExecutionError> {
        self.ledger.mark_submitted(key, Some(ack.order_id.as_str())).await?;

        let trade = match direction {
            OrderDirection::Buy => {
                let entry_price = ack.avg_price.or(intent.limit_price).unwrap_or_default();
                let shares = match ack.filled_shares {
                    Some(shares) => shares,
                    None if !entry_price.is_zero() => amount / entry_price,
                    None => Decimal::ZERO,
                };
                Some(NewTrade {
                    market_id: intent.market_id.clone(),
                    token_id: intent.token_id.clone(),
                    side: intent.side,
                    entry_price,
                    size_usd: amount,
                    shares,
                    status: TradeStatus::Pending,
                    note: None,
                    order_key: Some(key.to_string()),
                    entry_time: Utc::now(),
                })
            }
            OrderDirection::Sell => None,
        };
        self.ledger.record_fill(key, None, trade.as_ref()).await?;
        self.sync.invalidate();
        increment(CounterMetric::OrdersFilled, None);

        info!(
            key = %key,
            order_id = %ack.order_id,
            market_id = %intent.market_id,
            side = %intent.side,
            %direction,
            %amount,
            "Order filled"
        );

        Ok(OrderResult::filled(key, Some(ack.order_id)))
    }

    /// Cancel every resting order at the venue
    ///
    /// The follow-up state refresh is advisory; its failure is only logged.
    pub async fn cancel_all_orders(&self) -> Result<usize, ExecutionError> {
        let cancelled = self.venue.cancel_all().await.map_err(ExecutionError::Venue)?;
        info!(cancelled, venue = self.venue.name(), "Cancelled open orders");

        self.sync.invalidate();
        if let Err(e) = self.sync.get_state(true).await {
            warn!(error = %e, "State refresh after cancel-all failed");
        }
        Ok(cancelled)
    }

    /// Resolve once no order is in flight
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await
    }

    pub fn in_flight_markets(&self) -> Vec<String> {
        self.in_flight.markets()
    }

    fn reject(&self, key: impl Into<String>, reason: RejectReason, error: impl Into<String>) -> OrderResult {
        let error = error.into();
        debug!(reason = reason.as_str(), error = %error, "Order rejected by safety check");
        increment(CounterMetric::OrdersRejected, Some(reason.as_str()));
        OrderResult::rejected(key, reason, error)
    }
}

/// Size as requested, before validation
fn requested_amount(intent: &OrderIntent, direction: OrderDirection) -> Decimal {
    match direction {
        OrderDirection::Buy => intent.size_usd,
        OrderDirection::Sell => intent.shares.unwrap_or_default(),
    }
}

/// USD for buys, shares for sells
fn order_amount(intent: &OrderIntent, direction: OrderDirection) -> Result<Decimal, String> {
    let amount = match direction {
        OrderDirection::Buy => intent.size_usd,
        OrderDirection::Sell => intent.shares.ok_or("sell intent without share count")?,
    };
    if amount <= Decimal::ZERO {
        return Err(format!("order size must be positive, got {}", amount));
    }
    if let Some(price) = intent.limit_price {
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return Err(format!("limit price {} outside (0, 1)", price));
        }
    }
    Ok(amount)
}

/// Outcome for a key the ledger already knows
fn replay(record: OrderTrackingRecord) -> OrderResult {
    debug!(key = %record.idempotency_key, status = %record.status, "Replaying stored order outcome");
    match record.status {
        OrderStatus::Filled => OrderResult::filled(record.idempotency_key, record.external_order_id),
        OrderStatus::Failed | OrderStatus::Cancelled => OrderResult::rejected(
            record.idempotency_key,
            record
                .failure_reason
                .as_deref()
                .and_then(|code| code.parse().ok())
                .unwrap_or(RejectReason::PreviouslyFailed),
            record
                .error_message
                .unwrap_or_else(|| format!("previous attempt {}", record.status)),
        ),
        OrderStatus::Created | OrderStatus::Submitted => OrderResult::rejected(
            record.idempotency_key,
            RejectReason::InProgress,
            format!("previous attempt still {}", record.status),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::execution::PaperVenue;
    use crate::strategy::Side;
    use rust_decimal_macros::dec;

    struct Harness {
        venue: Arc<PaperVenue>,
        ledger: LedgerStore,
        executor: SafetyCheckedExecutor,
    }

    async fn harness(mode: ExecutionMode, balance: Decimal) -> Harness {
        let venue = Arc::new(PaperVenue::new(balance));
        let ledger = LedgerStore::in_memory().await.unwrap();
        let sync = Arc::new(
            AccountSynchronizer::new(venue.clone(), SyncConfig::default()).with_positions(venue.clone()),
        );
        let risk = RiskConfig {
            max_exposure_usd: dec!(50),
            ..RiskConfig::default()
        };
        let config = ExecutionConfig {
            mode,
            ..ExecutionConfig::default()
        };
        let executor = SafetyCheckedExecutor::new(ledger.clone(), sync, venue.clone(), &risk, config);
        Harness { venue, ledger, executor }
    }

    fn intent(market: &str, usd: Decimal) -> OrderIntent {
        OrderIntent::buy(market, format!("{}-yes", market), Side::Yes, usd).with_limit_price(dec!(0.5))
    }

    #[tokio::test]
    async fn test_buy_fills_and_records_pending_trade() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        let result = h.executor.place_order(&intent("m1", dec!(10)), OrderDirection::Buy).await.unwrap();

        assert!(result.success);
        assert!(result.external_order_id.is_some());

        let record = h.ledger.get_order(&result.idempotency_key).await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Filled);

        let trades = h.ledger.open_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Pending);
        assert_eq!(trades[0].shares, dec!(20));
        assert_eq!(trades[0].order_key.as_deref(), Some(result.idempotency_key.as_str()));
    }

    #[tokio::test]
    async fn test_replay_returns_stored_result_without_venue_call() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        let order = intent("m1", dec!(10)).with_key("fixed-key");

        let first = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap();
        let second = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.venue.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_position_rejected() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        h.venue.seed_position("m1", "m1-no", Side::No, dec!(10), dec!(0.4)).await;

        let result = h.executor.place_order(&intent("m1", dec!(10)), OrderDirection::Buy).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::DuplicatePosition));
        assert_eq!(h.venue.submission_count(), 0);
        assert!(h.ledger.get_order(&result.idempotency_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exposure_ceiling() {
        let h = harness(ExecutionMode::Paper, dec!(500)).await;
        h.venue.seed_position("m0", "m0-yes", Side::Yes, dec!(90), dec!(0.5)).await;

        // 45 held + 10 > 50
        let result = h.executor.place_order(&intent("m1", dec!(10)), OrderDirection::Buy).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::ExposureLimit));

        // 45 held + 5 == 50 is allowed
        let result = h.executor.place_order(&intent("m2", dec!(5)), OrderDirection::Buy).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let h = harness(ExecutionMode::Paper, dec!(5)).await;
        let result = h.executor.place_order(&intent("m1", dec!(10)), OrderDirection::Buy).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::InsufficientBalance));
        assert_eq!(h.venue.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_state_unavailable_rejects() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        h.venue.set_balance_unavailable(true).await;

        let result = h.executor.place_order(&intent("m1", dec!(10)), OrderDirection::Buy).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::StateUnavailable));
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let h = harness(ExecutionMode::DryRun, dec!(100)).await;
        let result = h.executor.place_order(&intent("m1", dec!(10)), OrderDirection::Buy).await.unwrap();

        assert!(result.success);
        assert!(result.dry_run);
        assert_eq!(h.venue.submission_count(), 0);
        assert!(h.ledger.get_order(&result.idempotency_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_venue_rejection_recorded_and_replayed() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        h.venue.reject_next("market closed").await;
        let order = intent("m1", dec!(10)).with_key("k-rej");

        let result = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::VenueRejected));
        let record = h.ledger.get_order("k-rej").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("market closed"));

        let replayed = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap();
        assert_eq!(replayed, result);
        assert_eq!(h.venue.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_replays_as_previously_failed() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        h.venue.fail_next("connection reset").await;
        let order = intent("m1", dec!(10)).with_key("k-io-replay");
        assert!(h.executor.place_order(&order, OrderDirection::Buy).await.is_err());

        let replayed = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap();
        assert_eq!(replayed.reason, Some(RejectReason::PreviouslyFailed));
        assert_eq!(h.venue.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_derived_key_collapses_repeats_in_bucket() {
        let mut h = harness(ExecutionMode::Paper, dec!(100)).await;
        // One bucket spans decades, so both calls land in it
        h.executor.config.idempotency_bucket_secs = 1_000_000_000;
        let order = intent("m1", dec!(10));

        let first = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap();
        let second = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap();

        assert!(first.success);
        assert!(!first.idempotency_key.is_empty());
        assert_eq!(first, second);
        assert_eq!(h.venue.submission_count(), 1);
        assert_eq!(h.ledger.recent_orders(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stored_key_wins_over_invalid_intent() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        let filled = h
            .executor
            .place_order(&intent("m1", dec!(10)).with_key("k-stored"), OrderDirection::Buy)
            .await
            .unwrap();

        let invalid = intent("m1", Decimal::ZERO).with_key("k-stored");
        let replayed = h.executor.place_order(&invalid, OrderDirection::Buy).await.unwrap();
        assert_eq!(replayed, filled);

        // Without a caller key the rejection still carries a derived key
        let result = h.executor.place_order(&intent("m2", Decimal::ZERO), OrderDirection::Buy).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::InvalidIntent));
        assert!(!result.idempotency_key.is_empty());
        assert_eq!(h.venue.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_survives_failed_refresh() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        h.venue.set_balance_unavailable(true).await;

        let cancelled = h.executor.cancel_all_orders().await.unwrap();
        assert_eq!(cancelled, 0);
        assert_eq!(h.venue.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_error_and_marks_failed() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        h.venue.fail_next("connection reset").await;
        let order = intent("m1", dec!(10)).with_key("k-io");

        let err = h.executor.place_order(&order, OrderDirection::Buy).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Venue(VenueError::Transport(_))));
        let record = h.ledger.get_order("k-io").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Failed);
        assert!(h.executor.in_flight_markets().is_empty());
    }

    #[tokio::test]
    async fn test_sell_skips_position_gate() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;
        h.executor.place_order(&intent("m1", dec!(10)), OrderDirection::Buy).await.unwrap();

        let sell = OrderIntent::sell("m1", "m1-yes", Side::Yes, dec!(20), dec!(10)).with_limit_price(dec!(0.9));
        let result = h.executor.place_order(&sell, OrderDirection::Sell).await.unwrap();
        assert!(result.success);
        // Sells do not open trades
        assert_eq!(h.ledger.open_trades().await.unwrap().len(), 1);
        assert_eq!(h.venue.balance().await, dec!(108));
    }

    #[tokio::test]
    async fn test_invalid_intents_rejected() {
        let h = harness(ExecutionMode::Paper, dec!(100)).await;

        let zero = intent("m1", Decimal::ZERO);
        let result = h.executor.place_order(&zero, OrderDirection::Buy).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::InvalidIntent));

        let no_shares = OrderIntent::buy("m1", "m1-yes", Side::Yes, dec!(10));
        let result = h.executor.place_order(&no_shares, OrderDirection::Sell).await.unwrap();
        assert_eq!(result.reason, Some(RejectReason::InvalidIntent));
        assert_eq!(h.venue.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_same_market_single_submission() {
        let h = Arc::new(harness(ExecutionMode::Paper, dec!(100)).await);

        let mut handles = Vec::new();
        for i in 0..5 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                let order = intent("m1", dec!(10)).with_key(format!("k-{}", i));
                h.executor.place_order(&order, OrderDirection::Buy).await.unwrap()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            if result.success {
                successes += 1;
            } else {
                assert!(matches!(
                    result.reason,
                    Some(RejectReason::InFlight) | Some(RejectReason::DuplicatePosition)
                ));
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(h.venue.submission_count(), 1);
    }
}
