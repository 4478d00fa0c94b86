//! Gamma API client for market discovery
//!
//! Markets come from Polymarket's Gamma API; price history comes from the
//! CLOB `prices-history` endpoint keyed by the YES token.

use super::{MarketData, MarketDataError, MarketDataSource, MarketFilter, PricePoint};
use crate::strategy::Side;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Gamma API base URL
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// CLOB API base URL
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Configuration for the Gamma client
#[derive(Debug, Clone)]
pub struct GammaConfig {
    /// Base URL for the Gamma API
    pub base_url: String,
    /// Base URL for the CLOB API (price history)
    pub clob_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Page size used when listing markets
    pub page_size: usize,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            base_url: GAMMA_API_URL.to_string(),
            clob_url: CLOB_API_URL.to_string(),
            timeout: Duration::from_secs(10),
            page_size: 100,
        }
    }
}

/// Client for Polymarket's Gamma API
pub struct GammaClient {
    config: GammaConfig,
    client: Client,
    name: String,
}

impl GammaClient {
    /// Create a new client with custom configuration
    pub fn with_config(config: GammaConfig) -> Result<Self, MarketDataError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let name = format!("gamma({})", config.base_url);
        Ok(Self {
            config,
            client,
            name,
        })
    }

    /// Fetch one page of markets
    async fn fetch_page(
        &self,
        filter: &MarketFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<GammaMarket>, MarketDataError> {
        let url = format!("{}/markets", self.config.base_url);

        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        if filter.active_only {
            query.push(("active", "true".to_string()));
            query.push(("closed", "false".to_string()));
        }
        if let Some(end) = filter.end_before {
            query.push(("end_date_max", end.to_rfc3339()));
        }
        if let Some(ids) = &filter.market_ids {
            for id in ids {
                query.push(("condition_ids", id.clone()));
            }
        }

        tracing::debug!(url = %url, offset, limit, "Fetching markets from Gamma API");

        let response = self.client.get(&url).query(&query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Api(format!("Gamma API error: {} - {}", status, body)));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl MarketDataSource for GammaClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketData>, MarketDataError> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut markets = Vec::new();
        let mut offset = 0;

        while markets.len() < limit {
            let page_size = self.config.page_size.min(limit - markets.len());
            let page = self.fetch_page(filter, offset, page_size).await?;
            let fetched = page.len();

            for raw in page {
                match convert_to_market(raw) {
                    Ok(market) => markets.push(market),
                    Err(e) => tracing::debug!(error = %e, "Skipping unparseable market"),
                }
            }

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        tracing::info!(market_count = markets.len(), "Fetched markets from Gamma API");
        Ok(markets)
    }

    async fn fetch_price_history(&self, market: &MarketData) -> Result<Vec<PricePoint>, MarketDataError> {
        let url = format!("{}/prices-history", self.config.clob_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("market", market.yes_token_id.as_str()),
                ("interval", "max"),
                ("fidelity", "60"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Api(format!("CLOB API error: {} - {}", status, body)));
        }

        let history: PriceHistoryResponse = response.json().await?;
        history
            .history
            .into_iter()
            .map(|p| {
                let timestamp = Utc
                    .timestamp_opt(p.t, 0)
                    .single()
                    .ok_or_else(|| MarketDataError::Malformed(format!("bad timestamp {}", p.t)))?;
                let price = Decimal::from_str(&p.p.to_string())
                    .map_err(|e| MarketDataError::Malformed(format!("bad price {}: {}", p.p, e)))?;
                Ok(PricePoint { timestamp, price })
            })
            .collect()
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/markets", self.config.base_url);
        match self.client.get(&url).query(&[("limit", "1")]).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Gamma availability check failed");
                false
            }
        }
    }
}

/// Raw market response from Gamma API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: String,
    #[serde(default)]
    question: String,
    /// Outcome labels as JSON string
    outcomes: Option<String>,
    /// CLOB token IDs as JSON string
    clob_token_ids: Option<String>,
    /// Outcome prices as JSON string
    outcome_prices: Option<String>,
    end_date: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct PriceHistoryResponse {
    #[serde(default)]
    history: Vec<RawPricePoint>,
}

#[derive(Debug, Deserialize)]
struct RawPricePoint {
    t: i64,
    p: f64,
}

/// Convert a GammaMarket to our MarketData type
fn convert_to_market(gamma: GammaMarket) -> Result<MarketData, MarketDataError> {
    let token_ids = gamma
        .clob_token_ids
        .as_deref()
        .ok_or_else(|| MarketDataError::Malformed("missing clobTokenIds".to_string()))?;
    let (yes_token_id, no_token_id) = parse_token_ids(token_ids)?;

    let outcomes: Vec<String> = gamma
        .outcomes
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    let prices = gamma
        .outcome_prices
        .as_deref()
        .map(parse_outcome_prices)
        .unwrap_or_default();
    let yes_price = prices
        .first()
        .copied()
        .ok_or_else(|| MarketDataError::Malformed("missing outcomePrices".to_string()))?;

    let end_date = gamma
        .end_date
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let resolved_outcome = if gamma.closed {
        resolved_side(&prices)
    } else {
        None
    };

    Ok(MarketData {
        market_id: gamma.condition_id,
        question: gamma.question,
        outcomes,
        yes_token_id,
        no_token_id,
        yes_price,
        end_date,
        active: gamma.active,
        closed: gamma.closed,
        resolved_outcome,
    })
}

/// Parse CLOB token IDs from JSON string
///
/// Format: "[\"token1\", \"token2\"]" where token1 is YES and token2 is NO
fn parse_token_ids(token_ids_str: &str) -> Result<(String, String), MarketDataError> {
    let tokens: Vec<String> = serde_json::from_str(token_ids_str).map_err(|e| {
        MarketDataError::Malformed(format!("clobTokenIds {}: {}", token_ids_str, e))
    })?;

    match tokens.as_slice() {
        [yes, no] => Ok((yes.clone(), no.clone())),
        _ => Err(MarketDataError::Malformed(format!(
            "expected 2 token IDs, got {}",
            tokens.len()
        ))),
    }
}

/// Parse outcome prices from JSON string
///
/// Format: "[\"0.52\", \"0.48\"]"
fn parse_outcome_prices(prices_str: &str) -> Vec<Decimal> {
    let prices: Vec<String> = serde_json::from_str(prices_str).unwrap_or_default();
    prices
        .iter()
        .filter_map(|p| Decimal::from_str(p).ok())
        .collect()
}

/// Winning side of a closed market, read from settled outcome prices
fn resolved_side(prices: &[Decimal]) -> Option<Side> {
    match prices {
        [yes, no] if *yes == Decimal::ONE && no.is_zero() => Some(Side::Yes),
        [yes, no] if yes.is_zero() && *no == Decimal::ONE => Some(Side::No),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw_market(prices: &str, closed: bool) -> GammaMarket {
        GammaMarket {
            condition_id: "0x123abc".to_string(),
            question: "Will it rain tomorrow?".to_string(),
            outcomes: Some(r#"["Yes", "No"]"#.to_string()),
            clob_token_ids: Some(r#"["yes_token_123", "no_token_456"]"#.to_string()),
            outcome_prices: Some(prices.to_string()),
            end_date: Some("2024-01-15T10:15:00Z".to_string()),
            active: !closed,
            closed,
        }
    }

    #[test]
    fn test_parse_token_ids() {
        let (yes, no) = parse_token_ids(r#"["123456789", "987654321"]"#).unwrap();
        assert_eq!(yes, "123456789");
        assert_eq!(no, "987654321");
    }

    #[test]
    fn test_parse_token_ids_invalid() {
        assert!(parse_token_ids("invalid json").is_err());
        assert!(parse_token_ids(r#"["only_one"]"#).is_err());
    }

    #[test]
    fn test_parse_outcome_prices() {
        assert_eq!(
            parse_outcome_prices(r#"["0.52", "0.48"]"#),
            vec![dec!(0.52), dec!(0.48)]
        );
        assert!(parse_outcome_prices("not json").is_empty());
    }

    #[test]
    fn test_convert_to_market() {
        let market = convert_to_market(raw_market(r#"["0.72", "0.28"]"#, false)).unwrap();

        assert_eq!(market.market_id, "0x123abc");
        assert_eq!(market.yes_token_id, "yes_token_123");
        assert_eq!(market.no_token_id, "no_token_456");
        assert_eq!(market.yes_price, dec!(0.72));
        assert!(market.is_binary());
        assert!(market.end_date.is_some());
        assert!(market.resolved_outcome.is_none());
    }

    #[test]
    fn test_convert_closed_market_resolution() {
        let yes_won = convert_to_market(raw_market(r#"["1", "0"]"#, true)).unwrap();
        assert_eq!(yes_won.resolved_outcome, Some(Side::Yes));

        let no_won = convert_to_market(raw_market(r#"["0", "1"]"#, true)).unwrap();
        assert_eq!(no_won.resolved_outcome, Some(Side::No));

        let unsettled = convert_to_market(raw_market(r#"["0.5", "0.5"]"#, true)).unwrap();
        assert!(unsettled.resolved_outcome.is_none());
    }

    #[test]
    fn test_convert_to_market_missing_tokens() {
        let mut raw = raw_market(r#"["0.5", "0.5"]"#, false);
        raw.clob_token_ids = None;
        assert!(convert_to_market(raw).is_err());
    }

    #[tokio::test]
    async fn test_fetch_markets_from_api() {
        let server = MockServer::start().await;
        let body = serde_json::json!([{
            "conditionId": "0xabc",
            "question": "Will BTC close above 100k?",
            "outcomes": "[\"Yes\", \"No\"]",
            "clobTokenIds": "[\"t1\", \"t2\"]",
            "outcomePrices": "[\"0.66\", \"0.34\"]",
            "endDate": "2030-01-01T00:00:00Z",
            "active": true,
            "closed": false
        }]);
        Mock::given(method("GET"))
            .and(path("/markets"))
            .and(query_param("active", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = GammaClient::with_config(GammaConfig {
            base_url: server.uri(),
            clob_url: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let filter = MarketFilter {
            active_only: true,
            limit: Some(10),
            ..Default::default()
        };
        let markets = client.fetch_markets(&filter).await.unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].yes_price, dec!(0.66));
    }

    #[tokio::test]
    async fn test_fetch_price_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices-history"))
            .and(query_param("market", "yes_token_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": [{"t": 1700000000, "p": 0.61}, {"t": 1700003600, "p": 0.635}]
            })))
            .mount(&server)
            .await;

        let client = GammaClient::with_config(GammaConfig {
            base_url: server.uri(),
            clob_url: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let market = convert_to_market(raw_market(r#"["0.6", "0.4"]"#, false)).unwrap();
        let points = client.fetch_price_history(&market).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].price, dec!(0.635));
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = GammaClient::with_config(GammaConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();

        assert!(!client.is_available().await);
        let result = client.fetch_markets(&MarketFilter::default()).await;
        assert!(matches!(result, Err(MarketDataError::Api(_))));
    }
}
