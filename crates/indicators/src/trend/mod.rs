//! 趋势指标

pub mod sma;

pub use sma::{dip_below_pct, sma};
