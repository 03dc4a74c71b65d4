//! 风险档位
//!
//! 三档预设按周预算折算: 单笔仓位、单标的上限、同时持仓数、止损止盈、
//! 持有天数与周亏损上限。档位只给出默认值，显式配置优先。

use serde::{Deserialize, Serialize};

use super::limits::{BudgetSettings, RiskLimits};
use super::parameters::StrategyParameters;
use crate::value_objects::Percentage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

/// 档位预设，比例均相对周预算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePreset {
    /// 单笔仓位占周预算
    pub position_size_pct: f64,
    /// 单标的持仓上限占周预算
    pub max_position_pct: f64,
    pub max_open_positions: u32,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// 周亏损上限占周预算
    pub max_weekly_loss_pct: f64,
    pub hold_days: u32,
}

impl RiskProfile {
    pub const ALL: [RiskProfile; 3] = [
        RiskProfile::Conservative,
        RiskProfile::Balanced,
        RiskProfile::Aggressive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Balanced => "balanced",
            RiskProfile::Aggressive => "aggressive",
        }
    }

    pub fn preset(&self) -> ProfilePreset {
        match self {
            RiskProfile::Conservative => ProfilePreset {
                position_size_pct: 20.0,
                max_position_pct: 25.0,
                max_open_positions: 3,
                stop_loss_pct: 3.0,
                take_profit_pct: 5.0,
                max_weekly_loss_pct: 15.0,
                hold_days: 7,
            },
            RiskProfile::Balanced => ProfilePreset {
                position_size_pct: 30.0,
                max_position_pct: 40.0,
                max_open_positions: 4,
                stop_loss_pct: 5.0,
                take_profit_pct: 8.0,
                max_weekly_loss_pct: 25.0,
                hold_days: 5,
            },
            RiskProfile::Aggressive => ProfilePreset {
                position_size_pct: 40.0,
                max_position_pct: 60.0,
                max_open_positions: 5,
                stop_loss_pct: 8.0,
                take_profit_pct: 15.0,
                max_weekly_loss_pct: 40.0,
                hold_days: 3,
            },
        }
    }

    /// 档位对应的策略参数，截断到参数边界
    pub fn strategy_parameters(&self, weekly_budget: f64) -> StrategyParameters {
        let preset = self.preset();
        StrategyParameters {
            position_size: weekly_budget * preset.position_size_pct / 100.0,
            stop_loss_pct: preset.stop_loss_pct,
            take_profit_pct: preset.take_profit_pct,
            max_hold_days: preset.hold_days,
            ..StrategyParameters::default()
        }
        .normalized()
    }

    pub fn risk_limits(&self, weekly_budget: f64, base: &RiskLimits) -> RiskLimits {
        let preset = self.preset();
        RiskLimits {
            max_position_size: weekly_budget * preset.max_position_pct / 100.0,
            max_open_positions: Some(preset.max_open_positions),
            ..base.clone()
        }
    }

    pub fn budget_settings(&self, base: &BudgetSettings) -> BudgetSettings {
        BudgetSettings {
            max_weekly_loss: Percentage::new(self.preset().max_weekly_loss_pct).ok(),
            ..base.clone()
        }
    }
}

impl std::fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(RiskProfile::Conservative),
            "balanced" => Ok(RiskProfile::Balanced),
            "aggressive" => Ok(RiskProfile::Aggressive),
            other => Err(format!("未知的风险档位: {}", other)),
        }
    }
}
