//! Risk management module
//!
//! Position sizing and exposure limits

mod limits;
mod sizing;

pub use limits::{ExposureLimits, LimitBreach};
pub use sizing::calculate_position_size;
