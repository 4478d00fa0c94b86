//! Position sizing
//!
//! Fixed USD size per entry, clipped to the exposure headroom.

use rust_decimal::Decimal;

use super::limits::ExposureLimits;
use crate::config::RiskConfig;

/// Size in USD for the next entry
///
/// Returns zero when max positions or max exposure is reached, or when the
/// clipped size falls below the venue minimum order.
pub fn calculate_position_size(config: &RiskConfig, open_positions: usize, current_exposure: Decimal) -> Decimal {
    let limits = ExposureLimits::from_config(config);
    if limits.check_entry(open_positions, current_exposure).is_err() {
        return Decimal::ZERO;
    }

    let size = config.position_size_usd.min(limits.headroom(current_exposure));
    if size < config.min_order_usd || size <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    size
}
