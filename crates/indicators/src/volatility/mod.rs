//! 波动性指标

pub mod atr;

pub use atr::{atr_from_bars, AtrError, ATR, DEFAULT_ATR_PERIOD};
