//! 市场状态识别
//!
//! 对短窗口 (默认20) 和长窗口 (默认60) 的对数收益分别计算趋势强度
//! `mean / sample_std * sqrt(n)`，两个窗口同向且都超过阈值才判定为趋势，
//! 否则为震荡。只有震荡状态下买跌信号有效。

use dip_quant_domain::Regime;

use crate::stats::{mean, sample_std};

/// 最近 `window` 个对数收益的趋势强度，需要 `window + 1` 个收盘价
pub fn trend_strength(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window + 1 {
        return None;
    }
    let tail = &closes[closes.len() - window - 1..];
    let mut returns = Vec::with_capacity(window);
    for pair in tail.windows(2) {
        if pair[0] <= 0.0 || pair[1] <= 0.0 {
            return None;
        }
        returns.push((pair[1] / pair[0]).ln());
    }
    let m = mean(&returns)?;
    let sd = sample_std(&returns)?;
    if sd <= f64::EPSILON {
        return Some(if m.abs() <= f64::EPSILON {
            0.0
        } else {
            m.signum() * f64::INFINITY
        });
    }
    Some(m / sd * (window as f64).sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeDetector {
    pub short_window: usize,
    pub long_window: usize,
    pub threshold: f64,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            short_window: 20,
            long_window: 60,
            threshold: 1.0,
        }
    }
}

impl RegimeDetector {
    /// 所需最少收盘价数量
    pub fn warmup(&self) -> usize {
        self.short_window.max(self.long_window) + 1
    }

    /// 数据不足返回 `None`
    pub fn classify(&self, closes: &[f64]) -> Option<Regime> {
        let short = trend_strength(closes, self.short_window)?;
        let long = trend_strength(closes, self.long_window)?;
        let regime = if short > self.threshold && long > self.threshold {
            Regime::TrendingUp
        } else if short < -self.threshold && long < -self.threshold {
            Regime::TrendingDown
        } else {
            Regime::RangeBound
        };
        Some(regime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize, f: impl Fn(usize) -> f64) -> Vec<f64> {
        (0..n).map(f).collect()
    }

    #[test]
    fn test_steady_uptrend() {
        // 稳定上涨，带轻微波动
        let closes = series(80, |i| 100.0 * 1.01f64.powi(i as i32) * (1.0 + 0.001 * ((i % 3) as f64 - 1.0)));
        assert_eq!(RegimeDetector::default().classify(&closes), Some(Regime::TrendingUp));
    }

    #[test]
    fn test_steady_downtrend() {
        let closes = series(80, |i| 100.0 * 0.99f64.powi(i as i32) * (1.0 + 0.001 * ((i % 3) as f64 - 1.0)));
        assert_eq!(RegimeDetector::default().classify(&closes), Some(Regime::TrendingDown));
    }

    #[test]
    fn test_oscillation_is_range_bound() {
        let closes = series(80, |i| if i % 2 == 0 { 100.0 } else { 102.0 });
        assert_eq!(RegimeDetector::default().classify(&closes), Some(Regime::RangeBound));
    }

    #[test]
    fn test_insufficient_data() {
        let closes = series(40, |_| 100.0);
        assert_eq!(RegimeDetector::default().classify(&closes), None);
        assert_eq!(RegimeDetector::default().warmup(), 61);
    }
}
