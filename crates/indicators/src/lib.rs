//! # Dip Quant Indicators
//!
//! 实盘与回测共用的指标：均线、Z-score、ATR、市场状态、样本统计

pub mod momentum;
pub mod regime;
pub mod stats;
pub mod trend;
pub mod volatility;

pub use momentum::zscore;
pub use regime::{trend_strength, RegimeDetector};
pub use trend::{dip_below_pct, sma};
pub use volatility::{atr_from_bars, AtrError, ATR, DEFAULT_ATR_PERIOD};

// 统一指标接口
pub trait Indicator {
    type Input;
    type Output;

    fn update(&mut self, input: Self::Input) -> Self::Output;
    fn reset(&mut self);
}
