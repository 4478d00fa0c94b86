//! Position and exposure limits

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::config::RiskConfig;

/// Which limit blocks a new entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitBreach {
    /// Maximum concurrent positions reached
    MaxPositions(usize),
    /// Maximum exposure reached or exceeded
    MaxExposure(Decimal),
}

impl fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitBreach::MaxPositions(n) => write!(f, "max positions reached ({})", n),
            LimitBreach::MaxExposure(e) => write!(f, "max exposure reached (${})", e),
        }
    }
}

/// Exposure limits derived from the risk configuration
#[derive(Debug, Clone)]
pub struct ExposureLimits {
    pub max_positions: usize,
    pub max_exposure_usd: Decimal,
}

impl ExposureLimits {
    pub fn from_config(config: &RiskConfig) -> Self {
        Self {
            max_positions: config.max_positions,
            max_exposure_usd: config.max_exposure_usd,
        }
    }

    /// Check whether any new entry is allowed at all
    pub fn check_entry(&self, open_positions: usize, exposure: Decimal) -> Result<(), LimitBreach> {
        if open_positions >= self.max_positions {
            return Err(LimitBreach::MaxPositions(open_positions));
        }
        if exposure >= self.max_exposure_usd {
            return Err(LimitBreach::MaxExposure(exposure));
        }
        Ok(())
    }

    /// Room left under the exposure ceiling
    pub fn headroom(&self, exposure: Decimal) -> Decimal {
        (self.max_exposure_usd - exposure).max(Decimal::ZERO)
    }

    /// Whether adding `additional` on top of `committed` would cross the ceiling
    pub fn would_exceed(&self, committed: Decimal, additional: Decimal) -> bool {
        committed + additional > self.max_exposure_usd
    }
}
