//! Data API client for held positions

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{PositionRef, PositionSource, PositionsService};
use crate::execution::VenueError;
use crate::strategy::Side;

/// Maximum page size accepted by the Data API
const PAGE_LIMIT: usize = 500;

/// Position as returned by `GET /positions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataApiPosition {
    asset: String,
    condition_id: String,
    size: f64,
    avg_price: f64,
    cur_price: f64,
    #[serde(default)]
    cash_pnl: f64,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    title: Option<String>,
}

/// Client for Polymarket's Data API
pub struct DataApiClient {
    base_url: String,
    user: String,
    client: Client,
}

impl DataApiClient {
    /// Client for the positions of `user` (proxy wallet address)
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, timeout: Duration) -> Result<Self, VenueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            user: user.into(),
            client,
        })
    }

    async fn fetch_page(&self, offset: usize) -> Result<Vec<DataApiPosition>, VenueError> {
        let url = format!("{}/positions", self.base_url);
        let query = [
            ("user", self.user.clone()),
            ("limit", PAGE_LIMIT.to_string()),
            ("offset", offset.to_string()),
        ];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VenueError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| VenueError::Malformed(format!("positions: {}", e)))
    }
}

#[async_trait]
impl PositionsService for DataApiClient {
    async fn fetch_positions(&self) -> Result<Vec<PositionRef>, VenueError> {
        let mut raw = Vec::new();
        loop {
            let page = self.fetch_page(raw.len()).await?;
            let fetched = page.len();
            raw.extend(page);
            if fetched < PAGE_LIMIT {
                break;
            }
        }

        let mut positions = Vec::with_capacity(raw.len());
        for p in raw {
            let Ok(side) = p.outcome.parse::<Side>() else {
                debug!(market_id = %p.condition_id, outcome = %p.outcome, "Skipping non-binary position");
                continue;
            };
            positions.push(PositionRef {
                market_id: p.condition_id,
                token_id: p.asset,
                side,
                size: to_decimal(p.size)?,
                avg_entry_price: to_decimal(p.avg_price)?,
                current_price: to_decimal(p.cur_price)?,
                unrealized_pnl: to_decimal(p.cash_pnl)?,
                entry_time: None,
                title: p.title,
                provenance: PositionSource::DataApi,
            });
        }

        debug!(count = positions.len(), user = %self.user, "Fetched positions from Data API");
        Ok(positions)
    }
}

fn to_decimal(value: f64) -> Result<Decimal, VenueError> {
    Decimal::from_str(&value.to_string()).map_err(|_| VenueError::Malformed(format!("non-finite number {}", value)))
}
