//! Positions derived from venue fill history
//!
//! Fallback when the positions service is down. Net shares per
//! `(market, token)`; average entry is the buy-weighted price. The venue
//! history carries neither entry time nor market title.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::{PositionRef, PositionSource};
use crate::execution::VenueTrade;
use crate::ledger::OrderDirection;
use crate::strategy::Side;

#[derive(Default)]
struct Accum {
    side: Option<Side>,
    bought: Decimal,
    sold: Decimal,
    cost: Decimal,
    last_price: Decimal,
}

/// Replay fills into net positions, dropping anything below `min_size`
pub fn positions_from_trades(trades: &[VenueTrade], min_size: Decimal) -> Vec<PositionRef> {
    let mut sorted: Vec<&VenueTrade> = trades.iter().collect();
    sorted.sort_by_key(|t| t.timestamp);

    let mut books: BTreeMap<(String, String), Accum> = BTreeMap::new();
    for trade in sorted {
        let acc = books
            .entry((trade.market_id.clone(), trade.token_id.clone()))
            .or_default();
        acc.side = Some(trade.side);
        acc.last_price = trade.price;
        match trade.direction {
            OrderDirection::Buy => {
                acc.bought += trade.size;
                acc.cost += trade.size * trade.price;
            }
            OrderDirection::Sell => acc.sold += trade.size,
        }
    }

    books
        .into_iter()
        .filter_map(|((market_id, token_id), acc)| {
            let size = acc.bought - acc.sold;
            if size < min_size || size <= Decimal::ZERO || acc.bought.is_zero() {
                return None;
            }
            let avg_entry_price = acc.cost / acc.bought;
            Some(PositionRef {
                market_id,
                token_id,
                side: acc.side?,
                size,
                avg_entry_price,
                current_price: acc.last_price,
                unrealized_pnl: size * (acc.last_price - avg_entry_price),
                entry_time: None,
                title: None,
                provenance: PositionSource::TradeReplay,
            })
        })
        .collect()
}
