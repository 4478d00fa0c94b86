//! Account state synchronizer
//!
//! Caches the last observed account state and refreshes it from the venue
//! when it is stale or a caller forces it. A failed refresh falls back to
//! the stale cache, tagged [`StateOrigin::Cached`], and never to defaults.

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    positions_from_trades, AccountState, CollateralSource, PositionRef, PositionSource, PositionsService,
    StateOrigin, SyncError,
};
use crate::config::SyncConfig;
use crate::execution::ExecutionVenue;
use crate::telemetry::{increment, record_latency, CounterMetric, LatencyMetric};

/// A cached state and the sequence number taken when its fetch started
#[derive(Debug, Clone)]
struct CachedState {
    state: AccountState,
    fetch_seq: u64,
}

/// Keeps a view of the venue account consistent with the venue
///
/// Requests, fetches and invalidations draw from one sequence counter. A
/// forced read only reuses a fetch that started after it was requested,
/// and a fetch that started before the latest invalidation is never cached.
pub struct AccountSynchronizer {
    venue: Arc<dyn ExecutionVenue>,
    positions: Option<Arc<dyn PositionsService>>,
    collateral: Option<Arc<dyn CollateralSource>>,
    config: SyncConfig,
    cache: RwLock<Option<CachedState>>,
    refresh: Mutex<()>,
    seq: AtomicU64,
    invalidated_seq: AtomicU64,
}

impl AccountSynchronizer {
    pub fn new(venue: Arc<dyn ExecutionVenue>, config: SyncConfig) -> Self {
        Self {
            venue,
            positions: None,
            collateral: None,
            config,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
            seq: AtomicU64::new(0),
            invalidated_seq: AtomicU64::new(0),
        }
    }

    /// Use a dedicated positions service instead of trade replay
    pub fn with_positions(mut self, service: Arc<dyn PositionsService>) -> Self {
        self.positions = Some(service);
        self
    }

    /// Add an independent collateral reading
    pub fn with_collateral(mut self, source: Arc<dyn CollateralSource>) -> Self {
        self.collateral = Some(source);
        self
    }

    /// Current account state
    ///
    /// Without `force_refresh` a cached state younger than the staleness
    /// threshold is returned as-is. Otherwise a live fetch is made; a caller
    /// queued behind another fetch reuses its result only when that fetch
    /// started after the call was made.
    pub async fn get_state(&self, force_refresh: bool) -> Result<AccountState, SyncError> {
        if !force_refresh {
            if let Some(state) = self.fresh_cache() {
                return Ok(state);
            }
        }

        let requested = self.next_seq();
        let _refresh = self.refresh.lock().await;

        // A fetch that started after this request covers it
        let refreshed = self
            .cache
            .read()
            .as_ref()
            .filter(|c| c.state.origin == StateOrigin::Live && c.fetch_seq > requested)
            .map(|c| c.state.clone());
        if let Some(state) = refreshed {
            return Ok(state);
        }

        let fetch_seq = self.next_seq();
        let started = Instant::now();
        let result = self.fetch_live().await;
        record_latency(LatencyMetric::StateFetch, started.elapsed());

        match result {
            Ok(state) => {
                let mut cache = self.cache.write();
                if fetch_seq > self.invalidated_seq.load(Ordering::SeqCst) {
                    *cache = Some(CachedState {
                        state: state.clone(),
                        fetch_seq,
                    });
                } else {
                    debug!("Account state invalidated during fetch, not cached");
                }
                Ok(state)
            }
            Err(reason) => {
                let stale = self.cache.read().as_ref().map(|c| c.state.clone());
                match stale {
                    Some(mut state) => {
                        let age = state.age(Utc::now()).num_seconds();
                        warn!(error = %reason, age_secs = age, "Account refresh failed, serving cached state");
                        increment(CounterMetric::StaleStateServed, None);
                        state.origin = StateOrigin::Cached;
                        Ok(state)
                    }
                    None => Err(SyncError::Unavailable(reason)),
                }
            }
        }
    }

    /// Drop the cache so the next read goes to the venue
    ///
    /// Fetches already running when this is called are not cached.
    pub fn invalidate(&self) {
        let mut cache = self.cache.write();
        self.invalidated_seq.store(self.next_seq(), Ordering::SeqCst);
        *cache = None;
    }

    /// Balance minus open-order notional
    pub async fn available_balance(&self) -> Result<Decimal, SyncError> {
        Ok(self.get_state(false).await?.available_balance())
    }

    /// Position value plus open-order notional
    pub async fn total_exposure(&self) -> Result<Decimal, SyncError> {
        Ok(self.get_state(false).await?.total_exposure())
    }

    /// Always reads fresh; refuses to answer from a stale fallback
    pub async fn has_open_order_for_market(&self, market_id: &str) -> Result<bool, SyncError> {
        let state = self.fresh_state().await?;
        Ok(state.has_open_order_for_market(market_id))
    }

    /// Always reads fresh; refuses to answer from a stale fallback
    pub async fn has_position_in_market(&self, market_id: &str) -> Result<bool, SyncError> {
        let state = self.fresh_state().await?;
        Ok(state.has_position_in_market(market_id))
    }

    /// Forced read that fails instead of degrading
    pub async fn fresh_state(&self) -> Result<AccountState, SyncError> {
        let state = self.get_state(true).await?;
        if state.origin == StateOrigin::Cached {
            return Err(SyncError::StaleState {
                age_secs: state.age(Utc::now()).num_seconds(),
            });
        }
        Ok(state)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn fresh_cache(&self) -> Option<AccountState> {
        let cache = self.cache.read();
        let state = &cache.as_ref()?.state;
        if state.origin == StateOrigin::Live && !state.is_stale(self.config.staleness(), Utc::now()) {
            return Some(state.clone());
        }
        None
    }

    async fn fetch_live(&self) -> Result<AccountState, String> {
        let (balances, positions, open_orders) = tokio::join!(
            self.fetch_balances(),
            self.fetch_positions(),
            self.venue.list_open_orders()
        );

        let (balance, venue_balance, onchain_balance) = balances?;
        let (positions, position_source) = positions?;
        let open_orders = open_orders.map_err(|e| format!("open orders: {}", e))?;

        debug!(
            %balance,
            positions = positions.len(),
            open_orders = open_orders.len(),
            source = ?position_source,
            "Account state refreshed"
        );

        Ok(AccountState {
            balance,
            venue_balance,
            onchain_balance,
            open_orders,
            positions,
            position_source,
            observed_at: Utc::now(),
            origin: StateOrigin::Live,
        })
    }

    /// Effective balance is the larger reading; one source may fail
    async fn fetch_balances(&self) -> Result<(Decimal, Option<Decimal>, Option<Decimal>), String> {
        let onchain_fut = async {
            match &self.collateral {
                Some(source) => Some(source.fetch_balance().await),
                None => None,
            }
        };
        let (venue, onchain) = tokio::join!(self.venue.get_balance(), onchain_fut);

        let venue = match venue {
            Ok(b) => Some(b),
            Err(e) => {
                warn!(error = %e, venue = self.venue.name(), "Venue balance unavailable");
                None
            }
        };
        let onchain = match onchain {
            Some(Ok(b)) => Some(b),
            Some(Err(e)) => {
                warn!(error = %e, "On-chain balance unavailable");
                None
            }
            None => None,
        };

        match (venue, onchain) {
            (Some(v), Some(o)) => Ok((v.max(o), Some(v), Some(o))),
            (Some(v), None) => Ok((v, Some(v), None)),
            (None, Some(o)) => Ok((o, None, Some(o))),
            (None, None) => Err("no balance source available".to_string()),
        }
    }

    async fn fetch_positions(&self) -> Result<(Vec<PositionRef>, PositionSource), String> {
        let min_size = self.config.min_position_size;

        if let Some(service) = &self.positions {
            match service.fetch_positions().await {
                Ok(positions) => {
                    let source = positions.first().map(|p| p.provenance).unwrap_or(PositionSource::DataApi);
                    let kept = positions.into_iter().filter(|p| p.size >= min_size).collect();
                    return Ok((kept, source));
                }
                Err(e) => warn!(error = %e, "Positions service failed, replaying venue trades"),
            }
        }

        let trades = self
            .venue
            .list_trades()
            .await
            .map_err(|e| format!("positions: trade replay failed: {}", e))?;
        Ok((positions_from_trades(&trades, min_size), PositionSource::TradeReplay))
    }
}
