//! 动量指标

pub mod zscore;

pub use zscore::zscore;
