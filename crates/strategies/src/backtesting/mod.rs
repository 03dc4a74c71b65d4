//! 回测引擎模块

pub mod engine;
pub mod metrics;

pub use engine::{slice_by_date, BacktestConfig, BacktestEngine, BacktestReport, TradeRecord};
pub use metrics::*;
