//! Idempotency keys
//!
//! A key is a SHA-256 over the intent's identity and a coarse time bucket,
//! so a retry of the same intent inside one bucket maps to the same ledger
//! row. Retries that straddle a bucket boundary get a new key.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::ledger::OrderDirection;
use crate::strategy::Side;

/// Derive the idempotency key for an intent at `unix_secs`
pub fn derive_idempotency_key(
    market_id: &str,
    side: Side,
    direction: OrderDirection,
    size: Decimal,
    unix_secs: i64,
    bucket_secs: u64,
) -> String {
    let bucket = unix_secs.max(0) as u64 / bucket_secs.max(1);
    let material = format!(
        "{}|{}|{}|{}|{}",
        market_id,
        side.as_str(),
        direction.as_str(),
        size.normalize(),
        bucket
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}
