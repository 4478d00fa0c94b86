//! Polymarket CLOB venue
//!
//! REST client for the CLOB with L2 (API key) authentication. Orders are
//! EIP-712 signed by an [`OrderSigner`]; the default implementation hands
//! the order to a signing sidecar so no private key lives in this process.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, Response};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ExecutionVenue, MarketOrder, OrderAck, VenueError, VenueTrade};
use crate::account::OrderRef;
use crate::config::Credentials;
use crate::ledger::OrderDirection;
use crate::strategy::Side;

type HmacSha256 = Hmac<Sha256>;

/// First and last cursors of the CLOB's paginated endpoints
const START_CURSOR: &str = "MA==";
const END_CURSOR: &str = "LTE=";

/// USDC collateral has 6 decimals
const COLLATERAL_SCALE: Decimal = dec!(1000000);

/// L2 request signer built from API credentials
#[derive(Clone)]
pub struct L2Auth {
    address: String,
    api_key: String,
    secret: String,
    passphrase: String,
}

impl L2Auth {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            address: credentials.address.clone(),
            api_key: credentials.api_key.clone(),
            secret: credentials.api_secret.clone(),
            passphrase: credentials.passphrase.clone(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// HMAC-SHA256 over `timestamp + method + path + body`, URL-safe base64
    pub fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> Result<String, VenueError> {
        let secret = URL_SAFE
            .decode(&self.secret)
            .map_err(|e| VenueError::Signing(format!("failed to decode API secret: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(&secret).map_err(|e| VenueError::Signing(e.to_string()))?;
        mac.update(format!("{}{}{}{}", timestamp, method, path, body).as_bytes());

        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// Authentication headers for one request
    pub fn headers(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, VenueError> {
        Ok(vec![
            ("POLY_ADDRESS", self.address.clone()),
            ("POLY_SIGNATURE", self.sign(timestamp, method, path, body)?),
            ("POLY_TIMESTAMP", timestamp.to_string()),
            ("POLY_API_KEY", self.api_key.clone()),
            ("POLY_PASSPHRASE", self.passphrase.clone()),
        ])
    }
}

/// What a signer needs to produce a signed CLOB order
#[derive(Debug, Clone, Serialize)]
pub struct SignOrderRequest {
    pub token_id: String,
    /// "BUY" or "SELL"
    pub side: &'static str,
    /// USD for buys, shares for sells
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub order_type: &'static str,
}

/// Produces signed order payloads
#[async_trait]
pub trait OrderSigner: Send + Sync {
    async fn sign_order(&self, request: &SignOrderRequest) -> Result<Value, VenueError>;
}

/// Signer that delegates to an HTTP signing sidecar
pub struct RemoteSigner {
    url: String,
    client: Client,
}

impl RemoteSigner {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, VenueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct SignerResponse {
    order: Value,
}

#[async_trait]
impl OrderSigner for RemoteSigner {
    async fn sign_order(&self, request: &SignOrderRequest) -> Result<Value, VenueError> {
        let url = format!("{}/sign", self.url.trim_end_matches('/'));
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VenueError::Signing(format!("signer returned {}: {}", status, message)));
        }

        let signed: SignerResponse = response
            .json()
            .await
            .map_err(|e| VenueError::Signing(format!("signer response: {}", e)))?;
        Ok(signed.order)
    }
}

/// Signer for sessions that must never place orders
pub struct ReadOnlySigner;

#[async_trait]
impl OrderSigner for ReadOnlySigner {
    async fn sign_order(&self, _request: &SignOrderRequest) -> Result<Value, VenueError> {
        Err(VenueError::Signing("no signer configured; session is read-only".to_string()))
    }
}

/// Live Polymarket CLOB venue
pub struct ClobVenue {
    base_url: String,
    client: Client,
    auth: L2Auth,
    signer: Arc<dyn OrderSigner>,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "makingAmount", default)]
    making_amount: Option<String>,
    #[serde(rename = "takingAmount", default)]
    taking_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ClobOpenOrder {
    id: String,
    market: String,
    asset_id: String,
    side: String,
    price: String,
    original_size: String,
    size_matched: String,
}

#[derive(Debug, Deserialize)]
struct ClobTrade {
    id: String,
    market: String,
    asset_id: String,
    side: String,
    price: String,
    size: String,
    outcome: String,
    match_time: String,
}

#[derive(Debug, Deserialize)]
struct BalanceAllowance {
    #[serde(default)]
    balance: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    canceled: Vec<String>,
}

impl ClobVenue {
    pub fn new(
        base_url: impl Into<String>,
        auth: L2Auth,
        signer: Arc<dyn OrderSigner>,
        timeout: Duration,
    ) -> Result<Self, VenueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            auth,
            signer,
        })
    }

    /// Build an authenticated request; `path` is signed without the query string
    fn request(&self, method: Method, path: &str, body: &str) -> Result<RequestBuilder, VenueError> {
        let timestamp = Utc::now().timestamp();
        let headers = self.auth.headers(timestamp, method.as_str(), path, body)?;

        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));
        for (name, value) in headers {
            req = req.header(name, value);
        }
        Ok(req)
    }

    async fn get_paginated<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, VenueError> {
        let mut items = Vec::new();
        let mut cursor = START_CURSOR.to_string();

        loop {
            let response = self
                .request(Method::GET, path, "")?
                .query(&[("next_cursor", cursor.as_str())])
                .send()
                .await?;
            let page: Paginated<T> = json_or_error(response).await?;
            items.extend(page.data);

            if page.next_cursor.is_empty() || page.next_cursor == END_CURSOR {
                break;
            }
            cursor = page.next_cursor;
        }

        Ok(items)
    }
}

#[async_trait]
impl ExecutionVenue for ClobVenue {
    fn name(&self) -> &str {
        "clob"
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, VenueError> {
        let request = SignOrderRequest {
            token_id: order.token_id.clone(),
            side: match order.direction {
                OrderDirection::Buy => "BUY",
                OrderDirection::Sell => "SELL",
            },
            amount: order.amount,
            price: order.limit_price,
            order_type: "FOK",
        };
        let signed = self.signer.sign_order(&request).await?;

        let body = json!({
            "order": signed,
            "owner": self.auth.api_key(),
            "orderType": "FOK",
        })
        .to_string();

        debug!(market_id = %order.market_id, client_ref = %order.client_ref, "Posting CLOB order");

        let response = self
            .request(Method::POST, "/order", &body)?
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").or_else(|| v.get("errorMsg")).cloned())
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(VenueError::Rejected(message));
        }

        let placed: PlaceOrderResponse = json_or_error(response).await?;
        if !placed.success {
            return Err(VenueError::Rejected(
                placed.error_msg.unwrap_or_else(|| "order not accepted".to_string()),
            ));
        }
        let order_id = placed
            .order_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| VenueError::Malformed("accepted order without orderID".to_string()))?;

        let making = placed.making_amount.as_deref().and_then(|v| Decimal::from_str(v).ok());
        let taking = placed.taking_amount.as_deref().and_then(|v| Decimal::from_str(v).ok());
        let (filled_shares, avg_price) = match (order.direction, making, taking) {
            (OrderDirection::Buy, Some(usd), Some(shares)) if !shares.is_zero() => (Some(shares), Some(usd / shares)),
            (OrderDirection::Sell, Some(shares), Some(usd)) if !shares.is_zero() => (Some(shares), Some(usd / shares)),
            _ => (None, None),
        };

        Ok(OrderAck {
            order_id,
            status: placed.status,
            avg_price,
            filled_shares,
        })
    }

    async fn cancel_all(&self) -> Result<usize, VenueError> {
        let response = self.request(Method::DELETE, "/cancel-all", "")?.send().await?;
        let cancelled: CancelResponse = json_or_error(response).await?;
        Ok(cancelled.canceled.len())
    }

    async fn list_open_orders(&self) -> Result<Vec<OrderRef>, VenueError> {
        let raw: Vec<ClobOpenOrder> = self.get_paginated("/data/orders").await?;
        raw.into_iter()
            .map(|o| {
                Ok(OrderRef {
                    order_id: o.id,
                    market_id: o.market,
                    token_id: o.asset_id,
                    direction: parse_direction(&o.side)?,
                    price: parse_decimal("price", &o.price)?,
                    original_size: parse_decimal("original_size", &o.original_size)?,
                    size_matched: parse_decimal("size_matched", &o.size_matched)?,
                })
            })
            .collect()
    }

    async fn get_balance(&self) -> Result<Decimal, VenueError> {
        let response = self
            .request(Method::GET, "/balance-allowance", "")?
            .query(&[("asset_type", "COLLATERAL")])
            .send()
            .await?;
        let balance: BalanceAllowance = json_or_error(response).await?;
        Ok(parse_decimal("balance", &balance.balance)? / COLLATERAL_SCALE)
    }

    async fn list_trades(&self) -> Result<Vec<VenueTrade>, VenueError> {
        let raw: Vec<ClobTrade> = self.get_paginated("/data/trades").await?;
        let mut trades = Vec::with_capacity(raw.len());

        for t in raw {
            let Ok(side) = t.outcome.parse::<Side>() else {
                warn!(trade_id = %t.id, outcome = %t.outcome, "Skipping trade with non-binary outcome");
                continue;
            };
            let secs: i64 = t
                .match_time
                .parse()
                .map_err(|_| VenueError::Malformed(format!("match_time {}", t.match_time)))?;
            let timestamp = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| VenueError::Malformed(format!("match_time {}", t.match_time)))?;

            trades.push(VenueTrade {
                trade_id: t.id,
                market_id: t.market,
                token_id: t.asset_id,
                side,
                direction: parse_direction(&t.side)?,
                price: parse_decimal("price", &t.price)?,
                size: parse_decimal("size", &t.size)?,
                timestamp,
            });
        }

        Ok(trades)
    }
}

async fn json_or_error<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, VenueError> {
    let status = response.status();
    if !status.is_success() {
        return Err(VenueError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| VenueError::Malformed(e.to_string()))
}

fn parse_direction(side: &str) -> Result<OrderDirection, VenueError> {
    side.parse().map_err(VenueError::Malformed)
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, VenueError> {
    Decimal::from_str(value).map_err(|_| VenueError::Malformed(format!("{}: {:?}", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticSigner;

    #[async_trait]
    impl OrderSigner for StaticSigner {
        async fn sign_order(&self, request: &SignOrderRequest) -> Result<Value, VenueError> {
            Ok(json!({ "tokenId": request.token_id, "signature": "0xsig" }))
        }
    }

    fn auth() -> L2Auth {
        L2Auth::new(&Credentials {
            address: "0xabc".to_string(),
            api_key: "key-1".to_string(),
            api_secret: URL_SAFE.encode(b"super-secret"),
            passphrase: "pass".to_string(),
        })
    }

    fn venue(server: &MockServer) -> ClobVenue {
        ClobVenue::new(server.uri(), auth(), Arc::new(StaticSigner), Duration::from_secs(5)).unwrap()
    }

    fn buy() -> MarketOrder {
        MarketOrder {
            market_id: "m1".to_string(),
            token_id: "tok-yes".to_string(),
            side: Side::Yes,
            direction: OrderDirection::Buy,
            amount: dec!(10),
            limit_price: Some(dec!(0.7)),
            client_ref: "k1".to_string(),
        }
    }

    #[test]
    fn test_l2_signature_matches_hmac() {
        let auth = auth();
        let sig = auth.sign(1_700_000_000, "GET", "/data/orders", "").unwrap();

        let mut mac = HmacSha256::new_from_slice(b"super-secret").unwrap();
        mac.update(b"1700000000GET/data/orders");
        assert_eq!(sig, URL_SAFE.encode(mac.finalize().into_bytes()));

        assert_ne!(sig, auth.sign(1_700_000_000, "POST", "/order", "{}").unwrap());
    }

    #[test]
    fn test_l2_headers_complete() {
        let headers = auth().headers(1, "GET", "/x", "").unwrap();
        let names: Vec<&str> = headers.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["POLY_ADDRESS", "POLY_SIGNATURE", "POLY_TIMESTAMP", "POLY_API_KEY", "POLY_PASSPHRASE"]
        );
    }

    #[tokio::test]
    async fn test_submit_success_parses_fill() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .and(header_exists("POLY_SIGNATURE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "orderID": "0xorder",
                "status": "matched",
                "makingAmount": "10",
                "takingAmount": "14.285714"
            })))
            .mount(&server)
            .await;

        let ack = venue(&server).submit_market_order(&buy()).await.unwrap();
        assert_eq!(ack.order_id, "0xorder");
        assert_eq!(ack.filled_shares, Some(dec!(14.285714)));
        assert!(ack.avg_price.is_some());
    }

    #[tokio::test]
    async fn test_submit_business_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "not enough balance / allowance" })))
            .mount(&server)
            .await;

        let err = venue(&server).submit_market_order(&buy()).await.unwrap_err();
        assert!(matches!(err, VenueError::Rejected(ref m) if m.contains("not enough balance")));
    }

    #[tokio::test]
    async fn test_submit_unsuccessful_body_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errorMsg": "FOK order not filled"
            })))
            .mount(&server)
            .await;

        let err = venue(&server).submit_market_order(&buy()).await.unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_submit_server_error_is_not_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = venue(&server).submit_market_order(&buy()).await.unwrap_err();
        assert!(!err.is_rejection());
    }

    #[tokio::test]
    async fn test_balance_scaled_from_micro_usdc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balance-allowance"))
            .and(query_param("asset_type", "COLLATERAL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balance": "123450000",
                "allowance": "0"
            })))
            .mount(&server)
            .await;

        assert_eq!(venue(&server).get_balance().await.unwrap(), dec!(123.45));
    }

    #[tokio::test]
    async fn test_open_orders_paginated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/orders"))
            .and(query_param("next_cursor", START_CURSOR))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "o1", "market": "m1", "asset_id": "tok-yes", "side": "BUY",
                    "price": "0.5", "original_size": "20", "size_matched": "5"
                }],
                "next_cursor": "Mg=="
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/orders"))
            .and(query_param("next_cursor", "Mg=="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [],
                "next_cursor": END_CURSOR
            })))
            .mount(&server)
            .await;

        let orders = venue(&server).list_open_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].notional(), dec!(7.5));
        assert_eq!(orders[0].direction, OrderDirection::Buy);
    }

    #[tokio::test]
    async fn test_trades_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/trades"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {
                        "id": "t1", "market": "m1", "asset_id": "tok-yes", "side": "BUY",
                        "price": "0.7", "size": "14", "outcome": "Yes", "match_time": "1700000000"
                    },
                    {
                        "id": "t2", "market": "m9", "asset_id": "tok-x", "side": "BUY",
                        "price": "0.3", "size": "3", "outcome": "Lakers", "match_time": "1700000000"
                    }
                ],
                "next_cursor": END_CURSOR
            })))
            .mount(&server)
            .await;

        let trades = venue(&server).list_trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Yes);
        assert_eq!(trades[0].size, dec!(14));
    }

    #[tokio::test]
    async fn test_remote_signer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "order": { "salt": "1", "signature": "0xdead" }
            })))
            .mount(&server)
            .await;

        let signer = RemoteSigner::new(server.uri(), Duration::from_secs(5)).unwrap();
        let request = SignOrderRequest {
            token_id: "tok".to_string(),
            side: "BUY",
            amount: dec!(10),
            price: None,
            order_type: "FOK",
        };
        let signed = signer.sign_order(&request).await.unwrap();
        assert_eq!(signed["signature"], "0xdead");
    }
}
