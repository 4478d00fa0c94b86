//! Primary/fallback selection over market data sources

use super::{MarketData, MarketDataError, MarketDataSource, MarketFilter, PricePoint};
use crate::degraded::Degraded;
use std::sync::Arc;

/// Owns the configured data sources in priority order
pub struct DataSourceManager {
    sources: Vec<Arc<dyn MarketDataSource>>,
}

impl DataSourceManager {
    /// Create a manager with a primary source
    pub fn new(primary: Arc<dyn MarketDataSource>) -> Self {
        Self {
            sources: vec![primary],
        }
    }

    /// Append a fallback source, tried after all earlier ones
    pub fn with_fallback(mut self, fallback: Arc<dyn MarketDataSource>) -> Self {
        self.sources.push(fallback);
        self
    }

    /// First source that reports itself available
    pub async fn active_source(&self) -> Result<Arc<dyn MarketDataSource>, MarketDataError> {
        for source in &self.sources {
            if source.is_available().await {
                return Ok(source.clone());
            }
            tracing::warn!(source = source.name(), "Market data source unavailable");
        }
        Err(MarketDataError::NoSourceAvailable)
    }

    /// Fetch markets from the first source that answers
    pub async fn fetch_markets(
        &self,
        filter: &MarketFilter,
    ) -> Result<Vec<MarketData>, MarketDataError> {
        let mut last_err = MarketDataError::NoSourceAvailable;

        for source in &self.sources {
            if !source.is_available().await {
                tracing::warn!(source = source.name(), "Skipping unavailable source");
                continue;
            }
            match source.fetch_markets(filter).await {
                Ok(markets) => {
                    tracing::debug!(
                        source = source.name(),
                        count = markets.len(),
                        "Fetched markets"
                    );
                    return Ok(markets);
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Market fetch failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Fetch a single market by condition id
    pub async fn fetch_market(&self, market_id: &str) -> Result<Option<MarketData>, MarketDataError> {
        let filter = MarketFilter {
            market_ids: Some(vec![market_id.to_string()]),
            ..Default::default()
        };
        let markets = self.fetch_markets(&filter).await?;
        Ok(markets.into_iter().find(|m| m.market_id == market_id))
    }

    /// Fetch price histories, batched when the active source supports it.
    ///
    /// Markets whose history could not be fetched are reported as warnings
    /// and omitted from the value.
    pub async fn fetch_price_histories(
        &self,
        markets: &[MarketData],
    ) -> Result<Degraded<Vec<(String, Vec<PricePoint>)>>, MarketDataError> {
        let source = self.active_source().await?;

        if let Some(batch) = source.as_batch() {
            let histories = batch.fetch_price_history_batch(markets).await?;
            let mut result = Degraded::clean(histories);
            for market in markets {
                if !result.value.iter().any(|(id, _)| id == &market.market_id) {
                    result.warn(format!("no price history returned for {}", market.market_id));
                }
            }
            return Ok(result);
        }

        let mut result = Degraded::clean(Vec::with_capacity(markets.len()));
        for market in markets {
            match source.fetch_price_history(market).await {
                Ok(points) => result.value.push((market.market_id.clone(), points)),
                Err(e) => {
                    tracing::warn!(market_id = %market.market_id, error = %e, "Price history fetch failed");
                    result.warn(format!("price history for {} failed: {}", market.market_id, e));
                }
            }
        }
        Ok(result)
    }
}
