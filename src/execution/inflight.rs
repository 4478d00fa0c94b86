//! Per-market in-flight registry
//!
//! At most one order per market is being placed at any time within the
//! process. A slot is claimed atomically and released when its guard drops,
//! on every exit path.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    /// Market id to reserved USD
    slots: Mutex<HashMap<String, Decimal>>,
    idle: Notify,
}

/// Registry of markets with an order in flight
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Inner>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `market_id`, reserving `amount` USD of exposure
    ///
    /// Returns `None` if the market already has an order in flight.
    pub fn try_acquire(&self, market_id: &str, amount: Decimal) -> Option<InFlightGuard> {
        let mut slots = self.inner.slots.lock();
        if slots.contains_key(market_id) {
            return None;
        }
        slots.insert(market_id.to_string(), amount);
        Some(InFlightGuard {
            registry: self.clone(),
            market_id: market_id.to_string(),
        })
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.inner.slots.lock().contains_key(market_id)
    }

    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn markets(&self) -> Vec<String> {
        let mut markets: Vec<String> = self.inner.slots.lock().keys().cloned().collect();
        markets.sort();
        markets
    }

    /// Exposure reserved by in-flight orders in other markets
    pub fn reserved_excluding(&self, market_id: &str) -> Decimal {
        self.inner
            .slots
            .lock()
            .iter()
            .filter(|(market, _)| market.as_str() != market_id)
            .map(|(_, amount)| *amount)
            .sum()
    }

    /// Resolve once no order is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, market_id: &str) {
        let now_empty = {
            let mut slots = self.inner.slots.lock();
            slots.remove(market_id);
            slots.is_empty()
        };
        if now_empty {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Holds a market's in-flight slot until dropped
pub struct InFlightGuard {
    registry: InFlightRegistry,
    market_id: String,
}

impl InFlightGuard {
    pub fn market_id(&self) -> &str {
        &self.market_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(&self.market_id);
    }
}
