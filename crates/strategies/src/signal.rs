//! 入场信号
//!
//! 条件 (全部满足):
//! - 收盘价低于 SMA50 至少 `dip_buy_threshold_pct`
//! - 20 日 Z-score 不高于 `zscore_entry_threshold`
//! - 市场状态为震荡
//! - 加仓笔 (k >= 1) 需要新的一根K线，且收盘价比上一笔成交价再低 `dip_buy_threshold_pct`

use dip_quant_common::Bar;
use dip_quant_domain::{Position, Regime, StrategyParameters};
use dip_quant_indicators::{
    atr_from_bars, dip_below_pct, sma, zscore, RegimeDetector, DEFAULT_ATR_PERIOD,
};
use serde::{Deserialize, Serialize};

pub const SMA_PERIOD: usize = 50;
pub const ZSCORE_PERIOD: usize = 20;

/// 计算全部指标所需的最少K线数
pub fn warmup_bars() -> usize {
    SMA_PERIOD
        .max(ZSCORE_PERIOD)
        .max(DEFAULT_ATR_PERIOD + 1)
        .max(RegimeDetector::default().warmup())
}

/// 最新一根K线上的指标值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub ts: i64,
    pub close: f64,
    pub sma: f64,
    /// 低于均线的百分比
    pub dip_pct: f64,
    pub zscore: f64,
    pub atr: Option<f64>,
    pub regime: Regime,
}

/// 数据不足返回 `None`
pub fn compute_snapshot(bars: &[Bar]) -> Option<SignalSnapshot> {
    if bars.len() < warmup_bars() {
        return None;
    }
    let last = bars.last()?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let average = sma(&closes, SMA_PERIOD)?;
    Some(SignalSnapshot {
        ts: last.ts,
        close: last.close,
        sma: average,
        dip_pct: dip_below_pct(last.close, average)?,
        zscore: zscore(&closes, ZSCORE_PERIOD)?,
        atr: atr_from_bars(bars, DEFAULT_ATR_PERIOD),
        regime: RegimeDetector::default().classify(&closes)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    /// 第几笔 (从 0 开始)
    pub tranche: u32,
    pub notional: f64,
    pub reference_price: f64,
    pub atr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    InsufficientData,
    TranchesFilled,
    ExitPending,
    /// 上一笔成交后还没有新K线
    SameBar,
    NotADip { dip_pct: f64 },
    ZscoreAboveThreshold { zscore: f64 },
    Regime(Regime),
    AboveLastFill { close: f64, required: f64 },
    ZeroSize,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InsufficientData => write!(f, "K线数量不足"),
            SkipReason::TranchesFilled => write!(f, "分批已满"),
            SkipReason::ExitPending => write!(f, "平仓单处理中"),
            SkipReason::SameBar => write!(f, "等待新K线"),
            SkipReason::NotADip { dip_pct } => write!(f, "低于均线 {:.2}% 未达阈值", dip_pct),
            SkipReason::ZscoreAboveThreshold { zscore } => {
                write!(f, "Z-score {:.2} 未达阈值", zscore)
            }
            SkipReason::Regime(regime) => write!(f, "市场状态 {:?} 非震荡", regime),
            SkipReason::AboveLastFill { close, required } => {
                write!(f, "收盘价 {:.4} 未低于加仓价 {:.4}", close, required)
            }
            SkipReason::ZeroSize => write!(f, "仓位金额为 0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Enter(EntrySignal),
    Skip(SkipReason),
}

impl EntryDecision {
    pub fn signal(&self) -> Option<&EntrySignal> {
        match self {
            EntryDecision::Enter(s) => Some(s),
            EntryDecision::Skip(_) => None,
        }
    }
}

/// 单笔金额: 分批金额与风险上限取小
///
/// 风险上限满足 `notional * stop_loss_pct <= equity * risk_per_trade%`。
pub fn size_tranche(params: &StrategyParameters, equity: f64) -> f64 {
    let leg = params.tranche_notional();
    if equity <= 0.0 || params.stop_loss_pct <= 0.0 {
        return leg;
    }
    let risk_cap = equity * params.risk_per_trade / params.stop_loss_pct;
    leg.min(risk_cap).max(0.0)
}

/// 评估最新一根K线是否触发下一笔入场
pub fn evaluate_entry(
    params: &StrategyParameters,
    bars: &[Bar],
    position: Option<&Position>,
    equity: f64,
) -> EntryDecision {
    let Some(snapshot) = compute_snapshot(bars) else {
        return EntryDecision::Skip(SkipReason::InsufficientData);
    };

    let mut tranche = 0;
    if let Some(pos) = position {
        if pos.remaining_tranches() == 0 {
            return EntryDecision::Skip(SkipReason::TranchesFilled);
        }
        if pos.pending_exit {
            return EntryDecision::Skip(SkipReason::ExitPending);
        }
        if let Some(filled_at) = pos.last_fill_at() {
            if snapshot.ts <= filled_at.timestamp_millis() {
                return EntryDecision::Skip(SkipReason::SameBar);
            }
        }
        if let Some(last_price) = pos.last_fill_price() {
            let required = last_price * (1.0 - params.dip_buy_threshold_pct / 100.0);
            if snapshot.close > required {
                return EntryDecision::Skip(SkipReason::AboveLastFill {
                    close: snapshot.close,
                    required,
                });
            }
        }
        tranche = pos.filled_tranches();
    }

    if snapshot.dip_pct < params.dip_buy_threshold_pct {
        return EntryDecision::Skip(SkipReason::NotADip {
            dip_pct: snapshot.dip_pct,
        });
    }
    if snapshot.zscore > params.zscore_entry_threshold {
        return EntryDecision::Skip(SkipReason::ZscoreAboveThreshold {
            zscore: snapshot.zscore,
        });
    }
    if snapshot.regime != Regime::RangeBound {
        return EntryDecision::Skip(SkipReason::Regime(snapshot.regime));
    }

    let notional = size_tranche(params, equity);
    if notional <= 0.0 {
        return EntryDecision::Skip(SkipReason::ZeroSize);
    }
    EntryDecision::Enter(EntrySignal {
        tranche,
        notional,
        reference_price: snapshot.close,
        atr: snapshot.atr,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::DateTime;
    use dip_quant_common::utils::time::DAY_MS;
    use dip_quant_domain::TrancheFill;
    use float_cmp::approx_eq;

    pub const T0: i64 = 1_704_067_200_000;

    pub fn bar_at(i: usize, close: f64) -> Bar {
        Bar::new(
            T0 + i as i64 * DAY_MS,
            close,
            close * 1.01,
            close * 0.99,
            close,
            1_000.0,
        )
    }

    /// 80 根 100/102 来回震荡，最后一根跌到 `last`
    pub fn choppy_with_drop(last: f64) -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..79)
            .map(|i| bar_at(i, if i % 2 == 0 { 100.0 } else { 102.0 }))
            .collect();
        bars.push(bar_at(79, last));
        bars
    }

    fn params(tranches: u32) -> StrategyParameters {
        StrategyParameters {
            position_size: 100.0,
            dca_tranches: tranches,
            ..Default::default()
        }
    }

    #[test]
    fn test_warmup() {
        assert_eq!(warmup_bars(), 61);
        assert_eq!(
            evaluate_entry(&params(1), &choppy_with_drop(94.0)[..40], None, 10_000.0),
            EntryDecision::Skip(SkipReason::InsufficientData)
        );
    }

    #[test]
    fn test_dip_in_range_bound_market_enters() {
        let bars = choppy_with_drop(94.0);
        let snap = compute_snapshot(&bars).unwrap();
        assert_eq!(snap.regime, Regime::RangeBound);
        assert!(snap.dip_pct > 1.5);
        assert!(snap.zscore < -1.2);

        let decision = evaluate_entry(&params(2), &bars, None, 10_000.0);
        let signal = decision.signal().unwrap();
        assert_eq!(signal.tranche, 0);
        assert!(approx_eq!(f64, signal.notional, 50.0, epsilon = 1e-9));
        assert_eq!(signal.reference_price, 94.0);
    }

    #[test]
    fn test_no_dip_skips() {
        let bars = choppy_with_drop(101.0);
        assert!(matches!(
            evaluate_entry(&params(1), &bars, None, 10_000.0),
            EntryDecision::Skip(SkipReason::NotADip { .. })
        ));
    }

    #[test]
    fn test_trending_down_market_skips() {
        // 持续下跌: 均线下方、Z-score 很低，但不是震荡
        let bars: Vec<Bar> = (0..80)
            .map(|i| {
                let wiggle = 1.0 + 0.001 * ((i % 3) as f64 - 1.0);
                bar_at(i, 100.0 * 0.99f64.powi(i as i32) * wiggle)
            })
            .collect();
        let decision = evaluate_entry(
            &StrategyParameters {
                zscore_entry_threshold: -0.2,
                ..params(1)
            },
            &bars,
            None,
            10_000.0,
        );
        assert_eq!(
            decision,
            EntryDecision::Skip(SkipReason::Regime(Regime::TrendingDown))
        );
    }

    #[test]
    fn test_second_tranche_requires_new_bar_and_lower_price() {
        let bars = choppy_with_drop(94.0);
        let last = bars[bars.len() - 1];
        let fill = TrancheFill {
            index: 0,
            quantity: 50.0 / 94.0,
            price: 94.0,
            fee: 0.0,
            filled_at: DateTime::from_timestamp_millis(last.ts).unwrap(),
        };
        let pos = Position::open("s1", "SPY", 2, fill, None).unwrap();

        // 同一根K线不会再次入场
        assert_eq!(
            evaluate_entry(&params(2), &bars, Some(&pos), 10_000.0),
            EntryDecision::Skip(SkipReason::SameBar)
        );

        // 新K线但价格没有再跌 1.5%
        let mut next = bars.clone();
        next.push(bar_at(80, 93.5));
        assert!(matches!(
            evaluate_entry(&params(2), &next, Some(&pos), 10_000.0),
            EntryDecision::Skip(SkipReason::AboveLastFill { .. })
        ));

        let mut next = bars.clone();
        next.push(bar_at(80, 90.0));
        let decision = evaluate_entry(&params(2), &next, Some(&pos), 10_000.0);
        assert_eq!(decision.signal().map(|s| s.tranche), Some(1));
    }

    #[test]
    fn test_size_tranche_risk_cap() {
        let p = StrategyParameters {
            position_size: 1000.0,
            risk_per_trade: 1.0,
            stop_loss_pct: 2.0,
            dca_tranches: 1,
            ..Default::default()
        };
        // 1000 * 1% / 2% = 500
        assert!(approx_eq!(f64, size_tranche(&p, 1_000.0), 500.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, size_tranche(&p, 100_000.0), 1000.0, epsilon = 1e-9));
    }
}
