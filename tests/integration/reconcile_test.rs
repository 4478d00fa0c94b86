//! Reconciliation against a simulated venue

use poly_converge::account::AccountSynchronizer;
use poly_converge::config::{ExecutionConfig, ExecutionMode, ReconcileConfig, RiskConfig, SyncConfig};
use poly_converge::execution::{OrderDirection, OrderIntent, PaperVenue, SafetyCheckedExecutor};
use poly_converge::ledger::{LedgerStore, TradeStatus};
use poly_converge::reconcile::Reconciler;
use poly_converge::strategy::Side;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct World {
    venue: Arc<PaperVenue>,
    ledger: LedgerStore,
    executor: SafetyCheckedExecutor,
    reconciler: Reconciler,
}

async fn world() -> World {
    let venue = Arc::new(PaperVenue::new(dec!(100)));
    let ledger = LedgerStore::in_memory().await.unwrap();
    let sync = Arc::new(AccountSynchronizer::new(venue.clone(), SyncConfig::default()).with_positions(venue.clone()));
    let executor = SafetyCheckedExecutor::new(
        ledger.clone(),
        sync.clone(),
        venue.clone(),
        &RiskConfig::default(),
        ExecutionConfig {
            mode: ExecutionMode::Paper,
            ..ExecutionConfig::default()
        },
    );
    let reconciler = Reconciler::new(ledger.clone(), sync, ReconcileConfig { grace_period_secs: 0 });
    World {
        venue,
        ledger,
        executor,
        reconciler,
    }
}

#[tokio::test]
async fn test_fill_then_reconcile_promotes_and_stays_synced() {
    let w = world().await;
    let intent = OrderIntent::buy("m1", "m1-yes", Side::Yes, dec!(10)).with_limit_price(dec!(0.7));
    assert!(w.executor.place_order(&intent, OrderDirection::Buy).await.unwrap().success);

    let report = w.reconciler.reconcile().await.unwrap();
    assert!(report.synced);
    assert_eq!(report.promoted, 1);

    let second = w.reconciler.reconcile().await.unwrap();
    assert!(second.synced);
    assert!(!second.changed_ledger());

    let trades = w.ledger.trades_by_status(TradeStatus::Open).await.unwrap();
    assert_eq!(trades.len(), 1);
}

#[tokio::test]
async fn test_position_closed_elsewhere_goes_unknown_and_stays_unknown() {
    let w = world().await;
    let intent = OrderIntent::buy("m1", "m1-yes", Side::Yes, dec!(10)).with_limit_price(dec!(0.7));
    w.executor.place_order(&intent, OrderDirection::Buy).await.unwrap();
    w.reconciler.reconcile().await.unwrap();

    w.venue.drop_position("m1-yes").await;
    let report = w.reconciler.reconcile().await.unwrap();
    assert!(!report.synced);
    assert_eq!(report.marked_unknown, 1);

    // The position reappearing does not resurrect the unknown trade
    w.venue.seed_position("m1", "m1-yes", Side::Yes, dec!(10), dec!(0.7)).await;
    let report = w.reconciler.reconcile().await.unwrap();
    assert_eq!(report.synthesized, 1);
    assert_eq!(w.ledger.trades_by_status(TradeStatus::Unknown).await.unwrap().len(), 1);
    assert_eq!(w.ledger.trades_by_status(TradeStatus::Open).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dust_positions_are_ignored() {
    let w = world().await;
    w.venue.seed_position("m9", "m9-no", Side::No, dec!(0.001), dec!(0.5)).await;

    let report = w.reconciler.reconcile().await.unwrap();
    assert!(report.synced);
    assert_eq!(report.synthesized, 0);
}
