//! Orchestrator
//!
//! Drives two independent periodic cycles:
//!
//! - **scan**: discover markets, evaluate entries, place buys
//! - **check**: reconcile, evaluate exits, snapshot the account
//!
//! A cycle that fails is logged and recorded in a bounded error buffer;
//! scheduling continues. Shutdown stops new cycles, lets running ones
//! finish and then waits for in-flight orders to settle.

mod kill_switch;

pub use kill_switch::KillSwitch;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::account::{AccountSynchronizer, SyncError};
use crate::config::{ExecutionMode, RiskConfig, SchedulerConfig};
use crate::execution::{ExecutionError, OrderDirection, OrderIntent, SafetyCheckedExecutor};
use crate::ledger::{LedgerError, LedgerStore, RunSnapshot, TradeRecord, TradeStatus};
use crate::market::{DataSourceManager, MarketDataError, MarketFilter};
use crate::reconcile::{ReconcileError, ReconcileReport, Reconciler};
use crate::risk::calculate_position_size;
use crate::strategy::{calculate_pnl, ExitReason, HeldPosition, OpportunityEvaluator, ResolutionInfo};
use crate::telemetry::{increment, set_gauge, CounterMetric, GaugeMetric};

/// Errors that abort a whole cycle
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    MarketData(#[from] MarketDataError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Which periodic cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Scan,
    Check,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleKind::Scan => "scan",
            CycleKind::Check => "check",
        }
    }
}

/// An error kept in the ring buffer
#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub at: DateTime<Utc>,
    pub cycle: CycleKind,
    pub message: String,
}

/// What one scan cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub markets_seen: usize,
    pub qualified: usize,
    pub placed: usize,
    pub rejected: usize,
    /// Stopped early by the kill switch
    pub halted: bool,
}

/// What one check cycle did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckSummary {
    pub reconcile: Option<ReconcileReport>,
    pub exits: usize,
    pub halted: bool,
}

/// Wires the evaluator, executor and reconciler into scheduled cycles
pub struct Orchestrator {
    market_data: Arc<DataSourceManager>,
    ledger: LedgerStore,
    sync: Arc<AccountSynchronizer>,
    executor: Arc<SafetyCheckedExecutor>,
    reconciler: Reconciler,
    evaluator: Mutex<OpportunityEvaluator>,
    risk: RiskConfig,
    scheduler: SchedulerConfig,
    fetch_limit: usize,
    kill_switch: KillSwitch,
    errors: Mutex<VecDeque<RecordedError>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market_data: Arc<DataSourceManager>,
        ledger: LedgerStore,
        sync: Arc<AccountSynchronizer>,
        executor: Arc<SafetyCheckedExecutor>,
        reconciler: Reconciler,
        evaluator: OpportunityEvaluator,
        risk: RiskConfig,
        scheduler: SchedulerConfig,
        fetch_limit: usize,
    ) -> Self {
        Self {
            market_data,
            ledger,
            sync,
            executor,
            reconciler,
            evaluator: Mutex::new(evaluator),
            risk,
            scheduler,
            fetch_limit,
            kill_switch: KillSwitch::new(),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    pub fn kill_switch(&self) -> KillSwitch {
        self.kill_switch.clone()
    }

    /// Stop new work and cancel resting venue orders
    ///
    /// Dry-run never touches the venue, so only the switch is engaged.
    pub async fn halt(&self) -> Result<usize, ExecutionError> {
        self.kill_switch.engage();
        if self.executor.mode() == ExecutionMode::DryRun {
            return Ok(0);
        }
        self.executor.cancel_all_orders().await
    }

    /// Most recent cycle errors, oldest first
    pub fn recent_errors(&self) -> Vec<RecordedError> {
        self.errors.lock().iter().cloned().collect()
    }

    /// Run both cycles until `shutdown` flips to true, then drain
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            scan_secs = self.scheduler.scan_interval_secs,
            check_secs = self.scheduler.check_interval_secs,
            mode = %self.executor.mode(),
            "Orchestrator started"
        );

        let scan = tokio::spawn(self.clone().cycle_loop(
            CycleKind::Scan,
            Duration::from_secs(self.scheduler.scan_interval_secs),
            shutdown.clone(),
        ));
        let check = tokio::spawn(self.clone().cycle_loop(
            CycleKind::Check,
            Duration::from_secs(self.scheduler.check_interval_secs),
            shutdown,
        ));

        for (kind, handle) in [(CycleKind::Scan, scan), (CycleKind::Check, check)] {
            if let Err(e) = handle.await {
                error!(cycle = kind.as_str(), error = %e, "Cycle task ended abnormally");
            }
        }

        info!(in_flight = ?self.executor.in_flight_markets(), "Waiting for in-flight orders");
        self.executor.wait_idle().await;
        info!("Orchestrator stopped");
    }

    /// One check cycle followed by one scan cycle
    pub async fn run_once(&self) -> (Option<CheckSummary>, Option<ScanSummary>) {
        let check = self.record(CycleKind::Check, self.check_cycle().await);
        let scan = self.record(CycleKind::Scan, self.scan_cycle().await);
        (check, scan)
    }

    async fn cycle_loop(self: Arc<Self>, kind: CycleKind, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match kind {
                CycleKind::Scan => {
                    let result = self.scan_cycle().await;
                    self.record(kind, result);
                }
                CycleKind::Check => {
                    let result = self.check_cycle().await;
                    self.record(kind, result);
                }
            }
        }

        debug!(cycle = kind.as_str(), "Cycle loop exited");
    }

    fn record<T>(&self, kind: CycleKind, result: Result<T, CycleError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(cycle = kind.as_str(), error = %e, "Cycle failed");
                increment(CounterMetric::CycleErrors, Some(kind.as_str()));
                self.push_error(kind, e.to_string());
                None
            }
        }
    }

    fn push_error(&self, cycle: CycleKind, message: String) {
        let mut errors = self.errors.lock();
        while errors.len() >= self.scheduler.error_buffer_size.max(1) {
            errors.pop_front();
        }
        errors.push_back(RecordedError {
            at: Utc::now(),
            cycle,
            message,
        });
    }

    // ==================== SCAN ====================

    /// Discover markets and enter the ones that qualify
    pub async fn scan_cycle(&self) -> Result<ScanSummary, CycleError> {
        let mut summary = ScanSummary::default();
        if self.kill_switch.is_engaged() {
            summary.halted = true;
            return Ok(summary);
        }

        let now = Utc::now();
        let state = self.sync.get_state(false).await?;
        let live = self.ledger.open_trades().await?;

        {
            let mut evaluator = self.evaluator.lock();
            for trade in &live {
                evaluator.mark_open(&trade.market_id);
            }
        }
        let held: HashSet<&str> = live.iter().map(|t| t.market_id.as_str()).collect();

        let max_days = self.evaluator.lock().config().max_days;
        let horizon = now + ChronoDuration::seconds((max_days * Decimal::from(86_400)).to_i64().unwrap_or(0));
        let filter = MarketFilter {
            active_only: true,
            market_ids: None,
            end_before: Some(horizon),
            limit: Some(self.fetch_limit),
        };
        let markets = self.market_data.fetch_markets(&filter).await?;
        summary.markets_seen = markets.len();

        let mut open_positions = state.positions.len().max(held.len());
        let mut exposure = state.total_exposure();

        for market in &markets {
            if self.kill_switch.is_engaged() {
                summary.halted = true;
                break;
            }
            if held.contains(market.market_id.as_str()) {
                continue;
            }

            let Some(signal) = self.evaluator.lock().evaluate_entry(market, now) else {
                continue;
            };
            summary.qualified += 1;

            let size = calculate_position_size(&self.risk, open_positions, exposure);
            if size.is_zero() {
                debug!(market_id = %signal.market_id, open_positions, %exposure, "No capacity for new entry");
                break;
            }

            let intent = OrderIntent::buy(&signal.market_id, &signal.token_id, signal.side, size)
                .with_limit_price(signal.price);

            info!(
                market_id = %signal.market_id,
                side = %signal.side,
                price = %signal.price,
                days = %signal.days_to_resolution.round_dp(2),
                size_usd = %size,
                "Entry signal"
            );

            match self.executor.place_order(&intent, OrderDirection::Buy).await {
                Ok(result) if result.success => {
                    summary.placed += 1;
                    open_positions += 1;
                    exposure += size;
                    self.evaluator.lock().mark_open(&signal.market_id);
                }
                Ok(result) => {
                    summary.rejected += 1;
                    debug!(
                        market_id = %signal.market_id,
                        reason = ?result.reason,
                        error = ?result.error,
                        "Entry not placed"
                    );
                }
                Err(e) => {
                    warn!(market_id = %signal.market_id, error = %e, "Entry order failed");
                    self.push_error(CycleKind::Scan, format!("entry {}: {}", signal.market_id, e));
                }
            }
        }

        info!(
            markets = summary.markets_seen,
            qualified = summary.qualified,
            placed = summary.placed,
            rejected = summary.rejected,
            "Scan cycle complete"
        );
        Ok(summary)
    }

    // ==================== CHECK ====================

    /// Reconcile, evaluate exits, write a snapshot
    pub async fn check_cycle(&self) -> Result<CheckSummary, CycleError> {
        let mut summary = CheckSummary::default();
        if self.kill_switch.is_engaged() {
            summary.halted = true;
            return Ok(summary);
        }

        summary.reconcile = Some(self.reconciler.reconcile().await?);

        for trade in self.ledger.trades_by_status(TradeStatus::Open).await? {
            if self.kill_switch.is_engaged() {
                summary.halted = true;
                break;
            }
            match self.check_exit(&trade).await {
                Ok(true) => summary.exits += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(trade_id = %trade.id, market_id = %trade.market_id, error = %e, "Exit check failed");
                    self.push_error(CycleKind::Check, format!("exit {}: {}", trade.market_id, e));
                }
            }
        }

        self.snapshot().await?;
        Ok(summary)
    }

    /// Returns whether the trade was closed
    async fn check_exit(&self, trade: &TradeRecord) -> Result<bool, CycleError> {
        let Some(market) = self.market_data.fetch_market(&trade.market_id).await? else {
            debug!(market_id = %trade.market_id, "Market not returned by data source");
            return Ok(false);
        };

        let now = Utc::now();
        let side_price = trade.side.price_from_yes(market.yes_price);
        let held = HeldPosition {
            side: trade.side,
            entry_price: trade.entry_price,
            size_usd: trade.size_usd,
        };
        let resolution = ResolutionInfo {
            end_date: market.end_date,
            outcome: market.resolved_outcome,
        };

        let Some(exit) = self
            .evaluator
            .lock()
            .check_exit_conditions(&held, side_price, &resolution, now)
        else {
            return Ok(false);
        };

        let pnl = calculate_pnl(trade.size_usd, trade.entry_price, exit.exit_price);
        info!(
            trade_id = %trade.id,
            market_id = %trade.market_id,
            reason = %exit.reason,
            exit_price = %exit.exit_price,
            %pnl,
            "Exit signal"
        );

        // Resolved markets settle on their own
        if exit.reason != ExitReason::Resolution {
            let mut intent = OrderIntent::sell(&trade.market_id, &trade.token_id, trade.side, trade.shares, trade.size_usd);
            if exit.exit_price > Decimal::ZERO && exit.exit_price < Decimal::ONE {
                intent = intent.with_limit_price(exit.exit_price);
            }

            let result = self.executor.place_order(&intent, OrderDirection::Sell).await?;
            if !result.success {
                warn!(trade_id = %trade.id, reason = ?result.reason, error = ?result.error, "Exit order not placed");
                return Ok(false);
            }
            if result.dry_run {
                return Ok(false);
            }
        }

        self.ledger
            .close_trade(&trade.id, exit.exit_price, exit.reason, pnl, now)
            .await?;
        self.evaluator.lock().mark_closed(&trade.market_id, exit.reason);
        Ok(true)
    }

    async fn snapshot(&self) -> Result<(), CycleError> {
        let state = self.sync.get_state(false).await?;
        let snapshot = RunSnapshot {
            timestamp: Utc::now(),
            balance: state.balance,
            total_exposure: state.total_exposure(),
            open_positions_count: state.positions.len() as i64,
            open_orders_count: state.open_orders.len() as i64,
        };
        self.ledger.append_snapshot(&snapshot).await?;

        set_gauge(GaugeMetric::Balance, snapshot.balance.to_f64().unwrap_or(0.0));
        set_gauge(GaugeMetric::TotalExposure, snapshot.total_exposure.to_f64().unwrap_or(0.0));
        set_gauge(GaugeMetric::OpenPositions, snapshot.open_positions_count as f64);
        set_gauge(GaugeMetric::OpenOrders, snapshot.open_orders_count as f64);
        set_gauge(GaugeMetric::InFlight, self.executor.in_flight_markets().len() as f64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionConfig, ReconcileConfig, StrategyConfig, SyncConfig};
    use crate::strategy::Side;
    use crate::execution::PaperVenue;
    use crate::market::{MarketData, MarketDataSource, PricePoint};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct StaticMarkets {
        markets: Mutex<Vec<MarketData>>,
    }

    #[async_trait]
    impl MarketDataSource for StaticMarkets {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketData>, MarketDataError> {
            let markets = self.markets.lock().clone();
            Ok(match &filter.market_ids {
                Some(ids) => markets.into_iter().filter(|m| ids.contains(&m.market_id)).collect(),
                None => markets,
            })
        }

        async fn fetch_price_history(&self, _market: &MarketData) -> Result<Vec<PricePoint>, MarketDataError> {
            Ok(Vec::new())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn market(id: &str, yes_price: Decimal) -> MarketData {
        MarketData {
            market_id: id.to_string(),
            question: format!("{}?", id),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            yes_token_id: format!("{}-yes", id),
            no_token_id: format!("{}-no", id),
            yes_price,
            end_date: Some(Utc::now() + ChronoDuration::hours(36)),
            active: true,
            closed: false,
            resolved_outcome: None,
        }
    }

    struct Fixture {
        venue: Arc<PaperVenue>,
        ledger: LedgerStore,
        source: Arc<StaticMarkets>,
        orchestrator: Orchestrator,
    }

    async fn fixture(mode: ExecutionMode, markets: Vec<MarketData>) -> Fixture {
        let venue = Arc::new(PaperVenue::new(dec!(100)));
        let ledger = LedgerStore::in_memory().await.unwrap();
        let sync = Arc::new(
            AccountSynchronizer::new(venue.clone(), SyncConfig::default()).with_positions(venue.clone()),
        );
        let risk = RiskConfig::default();
        let executor = Arc::new(SafetyCheckedExecutor::new(
            ledger.clone(),
            sync.clone(),
            venue.clone(),
            &risk,
            ExecutionConfig {
                mode,
                ..ExecutionConfig::default()
            },
        ));
        let reconciler = Reconciler::new(ledger.clone(), sync.clone(), ReconcileConfig { grace_period_secs: 0 });
        let source = Arc::new(StaticMarkets {
            markets: Mutex::new(markets),
        });
        let strategy = StrategyConfig {
            stop_loss: Some(dec!(0.4)),
            ..StrategyConfig::default()
        };

        let orchestrator = Orchestrator::new(
            Arc::new(DataSourceManager::new(source.clone())),
            ledger.clone(),
            sync,
            executor,
            reconciler,
            OpportunityEvaluator::new(strategy),
            risk,
            SchedulerConfig {
                error_buffer_size: 2,
                ..SchedulerConfig::default()
            },
            100,
        );
        Fixture {
            venue,
            ledger,
            source,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_scan_enters_qualifying_market_once() {
        let f = fixture(ExecutionMode::Paper, vec![market("m1", dec!(0.7)), market("m2", dec!(0.5))]).await;

        let summary = f.orchestrator.scan_cycle().await.unwrap();
        assert_eq!(summary.placed, 1);
        assert_eq!(f.ledger.open_trades().await.unwrap().len(), 1);

        let again = f.orchestrator.scan_cycle().await.unwrap();
        assert_eq!(again.placed, 0);
        assert_eq!(f.venue.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_check_promotes_then_exits_on_stop_loss() {
        let f = fixture(ExecutionMode::Paper, vec![market("m1", dec!(0.7))]).await;
        f.orchestrator.scan_cycle().await.unwrap();

        let check = f.orchestrator.check_cycle().await.unwrap();
        assert_eq!(check.reconcile.as_ref().unwrap().promoted, 1);
        assert_eq!(check.exits, 0);

        *f.source.markets.lock() = vec![market("m1", dec!(0.3))];
        f.venue.set_mark("m1-yes", dec!(0.3)).await;

        let check = f.orchestrator.check_cycle().await.unwrap();
        assert_eq!(check.exits, 1);
        let closed = f.ledger.trades_by_status(TradeStatus::Closed).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].exit_reason, Some(ExitReason::StopLoss));
        assert!(closed[0].pnl.unwrap() < Decimal::ZERO);

        // Closed markets are not re-entered
        *f.source.markets.lock() = vec![market("m1", dec!(0.7))];
        assert_eq!(f.orchestrator.scan_cycle().await.unwrap().placed, 0);
    }

    #[tokio::test]
    async fn test_check_cycle_writes_snapshot() {
        let f = fixture(ExecutionMode::Paper, Vec::new()).await;
        f.orchestrator.check_cycle().await.unwrap();
        f.orchestrator.check_cycle().await.unwrap();
        assert_eq!(f.ledger.snapshot_count().await.unwrap(), 2);
        assert_eq!(f.ledger.latest_snapshot().await.unwrap().unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_kill_switch_halts_cycles() {
        let f = fixture(ExecutionMode::Paper, vec![market("m1", dec!(0.7))]).await;
        f.orchestrator.kill_switch().engage();

        assert!(f.orchestrator.scan_cycle().await.unwrap().halted);
        assert!(f.orchestrator.check_cycle().await.unwrap().halted);
        assert_eq!(f.venue.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_halt_engages_switch_and_cancels() {
        let f = fixture(ExecutionMode::Paper, Vec::new()).await;
        assert_eq!(f.orchestrator.halt().await.unwrap(), 0);
        assert!(f.orchestrator.kill_switch().is_engaged());
        assert_eq!(f.venue.cancel_count(), 1);

        let dry = fixture(ExecutionMode::DryRun, Vec::new()).await;
        dry.orchestrator.halt().await.unwrap();
        assert!(dry.orchestrator.kill_switch().is_engaged());
        assert_eq!(dry.venue.cancel_count(), 0);
    }

    #[tokio::test]
    async fn test_resolution_exit_settles_once() {
        let f = fixture(ExecutionMode::Paper, vec![market("m1", dec!(0.7))]).await;
        f.orchestrator.scan_cycle().await.unwrap();
        f.orchestrator.check_cycle().await.unwrap();

        let mut resolved = market("m1", dec!(0.75));
        resolved.end_date = Some(Utc::now() - ChronoDuration::hours(1));
        resolved.resolved_outcome = Some(Side::Yes);
        *f.source.markets.lock() = vec![resolved];

        let first = f.orchestrator.check_cycle().await.unwrap();
        assert_eq!(first.exits, 1);
        let pnl = f.ledger.realized_pnl().await.unwrap();
        assert!(pnl > Decimal::ZERO);

        // The venue keeps reporting the unredeemed position
        for _ in 0..3 {
            let check = f.orchestrator.check_cycle().await.unwrap();
            let report = check.reconcile.unwrap();
            assert_eq!(check.exits, 0);
            assert_eq!(report.synthesized, 0);
            assert!(report.discrepancies.is_empty());
        }
        assert_eq!(f.ledger.trades_by_status(TradeStatus::Closed).await.unwrap().len(), 1);
        assert!(f.ledger.open_trades().await.unwrap().is_empty());
        assert_eq!(f.ledger.realized_pnl().await.unwrap(), pnl);
    }

    #[tokio::test]
    async fn test_error_buffer_is_bounded() {
        let f = fixture(ExecutionMode::Paper, Vec::new()).await;
        f.venue.set_balance_unavailable(true).await;

        for _ in 0..3 {
            f.orchestrator.run_once().await;
        }
        let errors = f.orchestrator.recent_errors();
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_places_nothing() {
        let f = fixture(ExecutionMode::DryRun, vec![market("m1", dec!(0.7))]).await;
        let summary = f.orchestrator.scan_cycle().await.unwrap();
        assert_eq!(summary.placed, 1);
        assert_eq!(f.venue.submission_count(), 0);
        assert!(f.ledger.open_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(ExecutionMode::Paper, Vec::new()).await;
        let orchestrator = Arc::new(f.orchestrator);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(orchestrator.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(f.ledger.snapshot_count().await.unwrap() >= 1);
    }
}
