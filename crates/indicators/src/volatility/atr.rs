use std::collections::VecDeque;
use std::fmt;

use dip_quant_common::Bar;
use thiserror::Error;

use crate::Indicator;

/// 默认 ATR 周期
pub const DEFAULT_ATR_PERIOD: usize = 14;

#[derive(Debug, Error)]
pub enum AtrError {
    #[error("Invalid period: {0}, must be greater than 0")]
    InvalidPeriod(usize),
}

/// ATR (Wilder 平滑)
///
/// 前 `period` 根取真实波幅的简单平均作为种子，之后按 1/period 递推。
#[derive(Debug, Clone)]
pub struct ATR {
    period: usize,
    alpha: f64,
    current: Option<f64>,
    prev_close: Option<f64>,
    seed: VecDeque<f64>,
}

impl ATR {
    pub fn new(period: usize) -> Result<Self, AtrError> {
        if period == 0 {
            return Err(AtrError::InvalidPeriod(0));
        }
        Ok(Self {
            period,
            alpha: 1.0 / period as f64,
            current: None,
            prev_close: None,
            seed: VecDeque::with_capacity(period),
        })
    }

    /// 输入最新K线的高低收，数据不足时返回 `None`
    pub fn next(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = self.true_range(high, low);
        self.prev_close = Some(close);

        match self.current {
            Some(prev) => {
                self.current = Some(self.alpha.mul_add(tr, (1.0 - self.alpha) * prev));
            }
            None => {
                self.seed.push_back(tr);
                if self.seed.len() == self.period {
                    self.current = Some(self.seed.iter().sum::<f64>() / self.period as f64);
                    self.seed.clear();
                }
            }
        }
        self.current
    }

    pub fn value(&self) -> Option<f64> {
        self.current
    }

    fn true_range(&self, high: f64, low: f64) -> f64 {
        match self.prev_close {
            None => high - low,
            Some(prev_close) => {
                let tr1 = high - low;
                let tr2 = (high - prev_close).abs();
                let tr3 = (low - prev_close).abs();
                tr1.max(tr2).max(tr3)
            }
        }
    }
}

impl Indicator for ATR {
    type Input = (f64, f64, f64);
    type Output = Option<f64>;

    fn update(&mut self, (high, low, close): Self::Input) -> Self::Output {
        self.next(high, low, close)
    }

    fn reset(&mut self) {
        self.current = None;
        self.prev_close = None;
        self.seed.clear();
    }
}

impl fmt::Display for ATR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ATR({}): {:.4}", self.period, self.current.unwrap_or(0.0))
    }
}

/// 对整段K线计算最新 ATR
pub fn atr_from_bars(bars: &[Bar], period: usize) -> Option<f64> {
    let mut atr = ATR::new(period).ok()?;
    let mut last = None;
    for bar in bars {
        last = atr.update((bar.high, bar.low, bar.close));
    }
    last
}
