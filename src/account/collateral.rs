//! On-chain USDC balance via Polygon JSON-RPC

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::CollateralSource;
use crate::execution::VenueError;

/// `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// USDC has 6 decimals
const USDC_DECIMALS: u32 = 6;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

/// Reads the wallet's USDC balance straight from the token contract
pub struct PolygonRpc {
    rpc_url: String,
    token_contract: String,
    wallet: String,
    client: Client,
}

impl PolygonRpc {
    pub fn new(
        rpc_url: impl Into<String>,
        token_contract: impl Into<String>,
        wallet: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VenueError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            token_contract: token_contract.into(),
            wallet: wallet.into(),
            client,
        })
    }
}

/// ABI-encode a `balanceOf(wallet)` call
fn balance_of_calldata(wallet: &str) -> Result<String, VenueError> {
    let bytes = hex::decode(wallet.trim_start_matches("0x"))
        .map_err(|e| VenueError::Malformed(format!("wallet address: {}", e)))?;
    if bytes.len() != 20 {
        return Err(VenueError::Malformed(format!(
            "wallet address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, hex::encode(bytes)))
}

/// Decode a uint256 hex result into a USD amount
fn decode_balance(result: &str) -> Result<Decimal, VenueError> {
    let digits = result.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let raw = i128::from_str_radix(digits, 16)
        .map_err(|e| VenueError::Malformed(format!("balance {}: {}", result, e)))?;
    Decimal::try_from_i128_with_scale(raw, USDC_DECIMALS)
        .map_err(|e| VenueError::Malformed(format!("balance {}: {}", result, e)))
}

#[async_trait]
impl CollateralSource for PolygonRpc {
    fn name(&self) -> &str {
        "polygon-rpc"
    }

    async fn fetch_balance(&self) -> Result<Decimal, VenueError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": self.token_contract, "data": balance_of_calldata(&self.wallet)? },
                "latest"
            ]
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VenueError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| VenueError::Malformed(format!("rpc response: {}", e)))?;
        if let Some(err) = rpc.error {
            return Err(VenueError::Api {
                status: status.as_u16(),
                message: err.message,
            });
        }
        let result = rpc
            .result
            .ok_or_else(|| VenueError::Malformed("rpc response without result".to_string()))?;

        decode_balance(&result)
    }
}
