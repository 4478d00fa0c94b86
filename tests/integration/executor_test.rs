//! Executor integration tests: restarts, crashes and concurrent cycles

use poly_converge::account::AccountSynchronizer;
use poly_converge::config::{ExecutionConfig, ExecutionMode, RiskConfig, SyncConfig};
use poly_converge::execution::{OrderDirection, OrderIntent, PaperVenue, RejectReason, SafetyCheckedExecutor};
use poly_converge::ledger::{LedgerStore, NewOrder, OrderStatus};
use poly_converge::strategy::Side;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn executor(venue: Arc<PaperVenue>, ledger: LedgerStore, max_exposure: Decimal) -> SafetyCheckedExecutor {
    let sync = Arc::new(AccountSynchronizer::new(venue.clone(), SyncConfig::default()).with_positions(venue.clone()));
    let risk = RiskConfig {
        max_exposure_usd: max_exposure,
        ..RiskConfig::default()
    };
    SafetyCheckedExecutor::new(
        ledger,
        sync,
        venue,
        &risk,
        ExecutionConfig {
            mode: ExecutionMode::Paper,
            ..ExecutionConfig::default()
        },
    )
}

fn buy(market: &str, usd: Decimal) -> OrderIntent {
    OrderIntent::buy(market, format!("{}-yes", market), Side::Yes, usd).with_limit_price(dec!(0.5))
}

#[tokio::test]
async fn test_replay_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
    let venue = Arc::new(PaperVenue::new(dec!(100)));
    let order = buy("m1", dec!(10)).with_key("restart-key");

    let first = {
        let ledger = LedgerStore::open(&url).await.unwrap();
        executor(venue.clone(), ledger, dec!(50))
            .place_order(&order, OrderDirection::Buy)
            .await
            .unwrap()
    };
    assert!(first.success);

    // New process, same ledger file
    let ledger = LedgerStore::open(&url).await.unwrap();
    let second = executor(venue.clone(), ledger, dec!(50))
        .place_order(&order, OrderDirection::Buy)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(venue.submission_count(), 1);
}

#[tokio::test]
async fn test_crash_after_created_is_reported_in_progress() {
    let venue = Arc::new(PaperVenue::new(dec!(100)));
    let ledger = LedgerStore::in_memory().await.unwrap();

    // A previous run wrote `created` and died before hearing back
    ledger
        .insert_created(&NewOrder {
            idempotency_key: "orphan".to_string(),
            market_id: "m1".to_string(),
            token_id: "m1-yes".to_string(),
            direction: OrderDirection::Buy,
            price: dec!(0.5),
            size: dec!(10),
        })
        .await
        .unwrap();

    let result = executor(venue.clone(), ledger.clone(), dec!(50))
        .place_order(&buy("m1", dec!(10)).with_key("orphan"), OrderDirection::Buy)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.reason, Some(RejectReason::InProgress));
    assert_eq!(venue.submission_count(), 0);
    assert_eq!(ledger.get_order("orphan").await.unwrap().unwrap().status, OrderStatus::Created);
}

#[tokio::test]
async fn test_concurrent_markets_respect_exposure_ceiling() {
    let venue = Arc::new(PaperVenue::new(dec!(500)));
    venue.seed_position("m0", "m0-yes", Side::Yes, dec!(70), dec!(0.5)).await;
    let ledger = LedgerStore::in_memory().await.unwrap();
    let executor = Arc::new(executor(venue.clone(), ledger, dec!(50)));

    // 35 held; either buy alone fits, both together would not
    let handles: Vec<_> = ["m1", "m2"]
        .into_iter()
        .map(|market| {
            let executor = executor.clone();
            tokio::spawn(async move { executor.place_order(&buy(market, dec!(10)), OrderDirection::Buy).await })
        })
        .collect();

    let mut filled = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        if result.success {
            filled += 1;
        } else {
            assert_eq!(result.reason, Some(RejectReason::ExposureLimit));
        }
    }

    assert!(filled <= 1);
    assert_eq!(venue.submission_count(), filled);
}

#[tokio::test]
async fn test_dry_run_then_paper_uses_fresh_key_space() {
    let venue = Arc::new(PaperVenue::new(dec!(100)));
    let ledger = LedgerStore::in_memory().await.unwrap();
    let sync = Arc::new(AccountSynchronizer::new(venue.clone(), SyncConfig::default()).with_positions(venue.clone()));
    let dry = SafetyCheckedExecutor::new(
        ledger.clone(),
        sync,
        venue.clone(),
        &RiskConfig::default(),
        ExecutionConfig::default(),
    );

    let order = buy("m1", dec!(10)).with_key("k");
    assert!(dry.place_order(&order, OrderDirection::Buy).await.unwrap().dry_run);

    // Dry run left nothing behind, so the real attempt goes through
    let live = executor(venue.clone(), ledger, dec!(50));
    let result = live.place_order(&order, OrderDirection::Buy).await.unwrap();
    assert!(result.success);
    assert!(!result.dry_run);
    assert_eq!(venue.submission_count(), 1);
}
