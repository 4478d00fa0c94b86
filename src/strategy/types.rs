//! Strategy types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome side of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Hold YES tokens
    Yes,
    /// Hold NO tokens
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }

    /// Price of this side given the YES price
    pub fn price_from_yes(&self, yes_price: Decimal) -> Decimal {
        match self {
            Side::Yes => yes_price,
            Side::No => Decimal::ONE - yes_price,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    /// Accepts stored values and venue outcome labels ("Yes", "NO", ...)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(Side::Yes),
            "no" => Ok(Side::No),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Held side reached the target price
    Target,
    /// Held side fell through the stop-loss
    StopLoss,
    /// Market resolved
    Resolution,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Target => "target",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Resolution => "resolution",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target" => Ok(ExitReason::Target),
            "stop_loss" => Ok(ExitReason::StopLoss),
            "resolution" => Ok(ExitReason::Resolution),
            other => Err(format!("unknown exit reason: {}", other)),
        }
    }
}

/// A market that currently satisfies the entry criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub market_id: String,
    /// Token to buy
    pub token_id: String,
    pub side: Side,
    /// Price of the chosen side
    pub price: Decimal,
    /// Fractional days until resolution
    pub days_to_resolution: Decimal,
    pub end_date: DateTime<Utc>,
}

/// Decision to close a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub reason: ExitReason,
    /// Price of the held side at exit
    pub exit_price: Decimal,
}

/// What the evaluator needs to know about a held position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldPosition {
    pub side: Side,
    pub entry_price: Decimal,
    pub size_usd: Decimal,
}

/// Resolution facts about a market
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionInfo {
    pub end_date: Option<DateTime<Utc>>,
    /// Winning side, once known
    pub outcome: Option<Side>,
}

/// Per-market decision state within one run
#[derive(Debug, Clone, PartialEq)]
pub enum MarketPhase {
    Unqualified,
    Qualified(EntrySignal),
    Open,
    Closed(ExitReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parse_venue_labels() {
        assert_eq!("Yes".parse::<Side>().unwrap(), Side::Yes);
        assert_eq!(" NO ".parse::<Side>().unwrap(), Side::No);
        assert!("Maybe".parse::<Side>().is_err());
    }

    #[test]
    fn test_side_price_from_yes() {
        assert_eq!(Side::Yes.price_from_yes(dec!(0.7)), dec!(0.7));
        assert_eq!(Side::No.price_from_yes(dec!(0.7)), dec!(0.3));
    }

    #[test]
    fn test_exit_reason_round_trip_str() {
        for reason in [ExitReason::Target, ExitReason::StopLoss, ExitReason::Resolution] {
            assert_eq!(reason.as_str().parse::<ExitReason>().unwrap(), reason);
        }
    }

    #[test]
    fn test_side_serde_lowercase() {
        let json = serde_json::to_string(&Side::No).unwrap();
        assert_eq!(json, "\"no\"");
    }
}
