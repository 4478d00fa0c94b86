//! End-to-end integration tests

use async_trait::async_trait;
use chrono::{Duration, Utc};
use poly_converge::account::AccountSynchronizer;
use poly_converge::config::{Config, ExecutionConfig, ExecutionMode, ReconcileConfig, SyncConfig};
use poly_converge::execution::{OrderDirection, OrderIntent, PaperVenue, SafetyCheckedExecutor};
use poly_converge::ledger::{LedgerStore, OrderStatus, TradeStatus};
use poly_converge::market::{DataSourceManager, MarketData, MarketDataError, MarketDataSource, MarketFilter, PricePoint};
use poly_converge::orchestrator::Orchestrator;
use poly_converge::reconcile::Reconciler;
use poly_converge::strategy::{OpportunityEvaluator, Side};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[test]
fn test_config_example_loads() {
    let config = Config::from_toml(include_str!("../../config.toml.example")).unwrap();
    assert_eq!(config.execution.mode, ExecutionMode::DryRun);
    assert_eq!(config.risk.max_exposure_usd, dec!(50));
    assert_eq!(config.strategy.stop_loss, Some(dec!(0.40)));
}

#[test]
fn test_invalid_config_is_rejected() {
    let toml = r#"
        [strategy]
        min_price = 0.9
        max_price = 0.6

        [ledger]
        url = "sqlite::memory:"

        [telemetry]
        log_level = "info"
    "#;
    assert!(Config::from_toml(toml).is_err());
}

#[tokio::test]
async fn test_buy_fill_and_replay() {
    let venue = Arc::new(PaperVenue::new(dec!(100)));
    let ledger = LedgerStore::in_memory().await.unwrap();
    let sync = Arc::new(AccountSynchronizer::new(venue.clone(), SyncConfig::default()).with_positions(venue.clone()));
    let config = Config::from_toml(include_str!("../../config.toml.example")).unwrap();
    let executor = SafetyCheckedExecutor::new(
        ledger.clone(),
        sync,
        venue.clone(),
        &config.risk,
        ExecutionConfig {
            mode: ExecutionMode::Paper,
            ..config.execution.clone()
        },
    );

    let intent = OrderIntent::buy("m1", "m1-yes", Side::Yes, dec!(10))
        .with_limit_price(dec!(0.7))
        .with_key("e2e-1");
    let result = executor.place_order(&intent, OrderDirection::Buy).await.unwrap();
    assert!(result.success);

    let record = ledger.get_order("e2e-1").await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Filled);
    assert!(record.filled_at.is_some());
    let trades = ledger.open_trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Pending);

    let replay = executor.place_order(&intent, OrderDirection::Buy).await.unwrap();
    assert_eq!(replay, result);
    assert_eq!(venue.submission_count(), 1);
    assert_eq!(venue.balance().await, dec!(90));
}

struct OneMarket(MarketData);

#[async_trait]
impl MarketDataSource for OneMarket {
    fn name(&self) -> &str {
        "one-market"
    }

    async fn fetch_markets(&self, _filter: &MarketFilter) -> Result<Vec<MarketData>, MarketDataError> {
        Ok(vec![self.0.clone()])
    }

    async fn fetch_price_history(&self, _market: &MarketData) -> Result<Vec<PricePoint>, MarketDataError> {
        Ok(Vec::new())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_orchestrator_run_once_full_cycle() {
    let config = Config::from_toml(include_str!("../../config.toml.example")).unwrap();
    let venue = Arc::new(PaperVenue::new(dec!(100)));
    let ledger = LedgerStore::in_memory().await.unwrap();
    let sync = Arc::new(AccountSynchronizer::new(venue.clone(), config.sync.clone()).with_positions(venue.clone()));
    let executor = Arc::new(SafetyCheckedExecutor::new(
        ledger.clone(),
        sync.clone(),
        venue.clone(),
        &config.risk,
        ExecutionConfig {
            mode: ExecutionMode::Paper,
            ..config.execution.clone()
        },
    ));
    let market = MarketData {
        market_id: "m1".to_string(),
        question: "Will it converge?".to_string(),
        outcomes: vec!["Yes".to_string(), "No".to_string()],
        yes_token_id: "m1-yes".to_string(),
        no_token_id: "m1-no".to_string(),
        yes_price: dec!(0.72),
        end_date: Some(Utc::now() + Duration::days(2)),
        active: true,
        closed: false,
        resolved_outcome: None,
    };
    let orchestrator = Orchestrator::new(
        Arc::new(DataSourceManager::new(Arc::new(OneMarket(market)))),
        ledger.clone(),
        sync.clone(),
        executor,
        Reconciler::new(ledger.clone(), sync, ReconcileConfig { grace_period_secs: 0 }),
        OpportunityEvaluator::new(config.strategy.clone()),
        config.risk.clone(),
        config.scheduler.clone(),
        config.market_data.fetch_limit,
    );

    let (check, scan) = orchestrator.run_once().await;
    assert!(check.unwrap().reconcile.unwrap().synced);
    assert_eq!(scan.unwrap().placed, 1);

    // Next pass confirms the fill and does not buy again
    let (check, scan) = orchestrator.run_once().await;
    assert_eq!(check.unwrap().reconcile.unwrap().promoted, 1);
    assert_eq!(scan.unwrap().placed, 0);
    assert_eq!(venue.submission_count(), 1);
    assert_eq!(ledger.snapshot_count().await.unwrap(), 2);
    assert!(orchestrator.recent_errors().is_empty());
}
