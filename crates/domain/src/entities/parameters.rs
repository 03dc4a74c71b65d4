//! 策略参数集及其取值边界
//!
//! 所有策略共用同一套买跌算法，差异只体现在参数上。
//! 每个参数都有 (默认值, 最小值, 最大值, 步长)，优化器按名称访问。

use dip_quant_common::AppError;
use serde::{Deserialize, Serialize};

/// 参数名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    PositionSize,
    RiskPerTrade,
    StopLossPct,
    TakeProfitPct,
    TrailingStopPct,
    AtrStopMult,
    ZscoreEntryThreshold,
    DipBuyThresholdPct,
    MaxHoldDays,
    DcaTranches,
    MaxConsecutiveLosses,
    MaxDrawdownPct,
}

impl ParamKey {
    pub const ALL: [ParamKey; 12] = [
        ParamKey::PositionSize,
        ParamKey::RiskPerTrade,
        ParamKey::StopLossPct,
        ParamKey::TakeProfitPct,
        ParamKey::TrailingStopPct,
        ParamKey::AtrStopMult,
        ParamKey::ZscoreEntryThreshold,
        ParamKey::DipBuyThresholdPct,
        ParamKey::MaxHoldDays,
        ParamKey::DcaTranches,
        ParamKey::MaxConsecutiveLosses,
        ParamKey::MaxDrawdownPct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParamKey::PositionSize => "position_size",
            ParamKey::RiskPerTrade => "risk_per_trade",
            ParamKey::StopLossPct => "stop_loss_pct",
            ParamKey::TakeProfitPct => "take_profit_pct",
            ParamKey::TrailingStopPct => "trailing_stop_pct",
            ParamKey::AtrStopMult => "atr_stop_mult",
            ParamKey::ZscoreEntryThreshold => "zscore_entry_threshold",
            ParamKey::DipBuyThresholdPct => "dip_buy_threshold_pct",
            ParamKey::MaxHoldDays => "max_hold_days",
            ParamKey::DcaTranches => "dca_tranches",
            ParamKey::MaxConsecutiveLosses => "max_consecutive_losses",
            ParamKey::MaxDrawdownPct => "max_drawdown_pct",
        }
    }

    pub fn bounds(&self) -> ParamBounds {
        let (default, min, max, step, integer) = match self {
            ParamKey::PositionSize => (1000.0, 50.0, 10000.0, 25.0, false),
            ParamKey::RiskPerTrade => (1.0, 0.1, 5.0, 0.1, false),
            ParamKey::StopLossPct => (2.0, 0.5, 10.0, 0.25, false),
            ParamKey::TakeProfitPct => (5.0, 1.0, 20.0, 0.5, false),
            ParamKey::TrailingStopPct => (2.5, 0.5, 15.0, 0.25, false),
            ParamKey::AtrStopMult => (2.0, 0.5, 5.0, 0.1, false),
            ParamKey::ZscoreEntryThreshold => (-1.2, -4.0, -0.2, 0.1, false),
            ParamKey::DipBuyThresholdPct => (1.5, 0.3, 10.0, 0.05, false),
            ParamKey::MaxHoldDays => (10.0, 1.0, 60.0, 1.0, true),
            ParamKey::DcaTranches => (1.0, 1.0, 3.0, 1.0, true),
            ParamKey::MaxConsecutiveLosses => (3.0, 1.0, 10.0, 1.0, true),
            ParamKey::MaxDrawdownPct => (15.0, 3.0, 50.0, 1.0, true),
        };
        ParamBounds {
            default,
            min,
            max,
            step,
            integer,
        }
    }
}

/// 单个参数的取值范围
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub integer: bool,
}

impl ParamBounds {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min - 1e-9 && value <= self.max + 1e-9
    }

    /// 截断到边界并对齐步长
    pub fn snap(&self, value: f64) -> f64 {
        let value = if value.is_finite() { value } else { self.default };
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step).round();
        self.finish(self.min + steps * self.step)
    }

    /// 向上对齐步长，用于保证参数间的下限关系
    pub fn snap_up(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step - 1e-9).ceil();
        self.finish(self.min + steps * self.step)
    }

    fn finish(&self, value: f64) -> f64 {
        let mut v = value.min(self.max);
        if self.integer {
            v = v.round();
        }
        (v * 1e6).round() / 1e6
    }
}

/// 策略参数集
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParameters {
    /// 目标仓位金额 (分 N 笔建仓)
    pub position_size: f64,
    /// 单笔风险占权益百分比
    pub risk_per_trade: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub atr_stop_mult: f64,
    /// Z-score 入场阈值 (负数)
    pub zscore_entry_threshold: f64,
    /// 收盘价低于均线的百分比阈值
    pub dip_buy_threshold_pct: f64,
    pub max_hold_days: u32,
    /// 分批建仓笔数 (1-3)
    pub dca_tranches: u32,
    pub max_consecutive_losses: u32,
    pub max_drawdown_pct: f64,
}

impl Default for StrategyParameters {
    fn default() -> Self {
        let mut params = Self {
            position_size: 0.0,
            risk_per_trade: 0.0,
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
            trailing_stop_pct: 0.0,
            atr_stop_mult: 0.0,
            zscore_entry_threshold: 0.0,
            dip_buy_threshold_pct: 0.0,
            max_hold_days: 0,
            dca_tranches: 0,
            max_consecutive_losses: 0,
            max_drawdown_pct: 0.0,
        };
        for key in ParamKey::ALL {
            params.set(key, key.bounds().default);
        }
        params
    }
}

impl StrategyParameters {
    pub fn get(&self, key: ParamKey) -> f64 {
        match key {
            ParamKey::PositionSize => self.position_size,
            ParamKey::RiskPerTrade => self.risk_per_trade,
            ParamKey::StopLossPct => self.stop_loss_pct,
            ParamKey::TakeProfitPct => self.take_profit_pct,
            ParamKey::TrailingStopPct => self.trailing_stop_pct,
            ParamKey::AtrStopMult => self.atr_stop_mult,
            ParamKey::ZscoreEntryThreshold => self.zscore_entry_threshold,
            ParamKey::DipBuyThresholdPct => self.dip_buy_threshold_pct,
            ParamKey::MaxHoldDays => self.max_hold_days as f64,
            ParamKey::DcaTranches => self.dca_tranches as f64,
            ParamKey::MaxConsecutiveLosses => self.max_consecutive_losses as f64,
            ParamKey::MaxDrawdownPct => self.max_drawdown_pct,
        }
    }

    /// 原样写入 (整数参数四舍五入)，不做边界处理
    pub fn set(&mut self, key: ParamKey, value: f64) {
        let as_u32 = |v: f64| v.round().max(0.0) as u32;
        match key {
            ParamKey::PositionSize => self.position_size = value,
            ParamKey::RiskPerTrade => self.risk_per_trade = value,
            ParamKey::StopLossPct => self.stop_loss_pct = value,
            ParamKey::TakeProfitPct => self.take_profit_pct = value,
            ParamKey::TrailingStopPct => self.trailing_stop_pct = value,
            ParamKey::AtrStopMult => self.atr_stop_mult = value,
            ParamKey::ZscoreEntryThreshold => self.zscore_entry_threshold = value,
            ParamKey::DipBuyThresholdPct => self.dip_buy_threshold_pct = value,
            ParamKey::MaxHoldDays => self.max_hold_days = as_u32(value),
            ParamKey::DcaTranches => self.dca_tranches = as_u32(value),
            ParamKey::MaxConsecutiveLosses => self.max_consecutive_losses = as_u32(value),
            ParamKey::MaxDrawdownPct => self.max_drawdown_pct = value,
        }
    }

    /// 校验全部参数在边界内
    pub fn validate(&self) -> Result<(), AppError> {
        for key in ParamKey::ALL {
            let bounds = key.bounds();
            let value = self.get(key);
            if !bounds.contains(value) {
                return Err(AppError::Validation(format!(
                    "{}={} 超出范围 [{}, {}]",
                    key.name(),
                    value,
                    bounds.min,
                    bounds.max
                )));
            }
        }
        Ok(())
    }

    /// 截断并对齐步长后的副本
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        for key in ParamKey::ALL {
            out.set(key, key.bounds().snap(self.get(key)));
        }
        out
    }

    /// 候选参数间的约束: 止盈 >= 1.8 x 止损, 移动止损 >= 0.9 x 止损
    pub fn enforce_relationships(&mut self) {
        let tp_floor = self.stop_loss_pct * 1.8;
        if self.take_profit_pct < tp_floor {
            self.take_profit_pct = ParamKey::TakeProfitPct.bounds().snap_up(tp_floor);
        }
        let trail_floor = self.stop_loss_pct * 0.9;
        if self.trailing_stop_pct < trail_floor {
            self.trailing_stop_pct = ParamKey::TrailingStopPct.bounds().snap_up(trail_floor);
        }
    }

    /// 单笔分批金额
    pub fn tranche_notional(&self) -> f64 {
        self.position_size / self.dca_tranches.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_defaults_are_valid() {
        let params = StrategyParameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.dca_tranches, 1);
        assert_eq!(params.max_hold_days, 10);
        assert!(approx_eq!(f64, params.zscore_entry_threshold, -1.2, epsilon = 1e-9));
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let params = StrategyParameters {
            dca_tranches: 4,
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("dca_tranches"));

        let params = StrategyParameters {
            stop_loss_pct: f64::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_snap_aligns_to_step() {
        let b = ParamKey::StopLossPct.bounds();
        assert!(approx_eq!(f64, b.snap(2.13), 2.25, epsilon = 1e-9));
        assert!(approx_eq!(f64, b.snap(99.0), 10.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, b.snap(0.0), 0.5, epsilon = 1e-9));

        let z = ParamKey::ZscoreEntryThreshold.bounds();
        assert!(approx_eq!(f64, z.snap(-1.234), -1.2, epsilon = 1e-9));
    }

    #[test]
    fn test_relationships() {
        let mut params = StrategyParameters {
            stop_loss_pct: 4.0,
            take_profit_pct: 5.0,
            trailing_stop_pct: 2.0,
            ..Default::default()
        };
        params.enforce_relationships();
        assert!(params.take_profit_pct >= 7.2);
        assert!(approx_eq!(f64, params.take_profit_pct, 7.5, epsilon = 1e-9));
        assert!(params.trailing_stop_pct >= 3.6);
        assert!(approx_eq!(f64, params.trailing_stop_pct, 3.75, epsilon = 1e-9));
    }

    #[test]
    fn test_tranche_notional() {
        let params = StrategyParameters {
            position_size: 100.0,
            dca_tranches: 2,
            ..Default::default()
        };
        assert!(approx_eq!(f64, params.tranche_notional(), 50.0, epsilon = 1e-9));
    }
}
