//! # Dip Quant Strategies
//!
//! 买跌策略：所有策略共用同一套入场/出场算法，只以参数区分。
//! 实盘 Runner 与回测引擎调用相同的函数。

pub mod backtesting;
pub mod exit;
pub mod signal;

pub use backtesting::{BacktestConfig, BacktestEngine, BacktestReport, TradeRecord};
pub use exit::{evaluate_exit, ExitSignal};
pub use signal::{
    compute_snapshot, evaluate_entry, size_tranche, warmup_bars, EntryDecision, EntrySignal,
    SignalSnapshot, SkipReason,
};
