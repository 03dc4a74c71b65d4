//! 账户级风控限额与周预算配置

use serde::{Deserialize, Serialize};

use crate::enums::DrawdownScope;
use crate::value_objects::Percentage;

/// 账户级风控限额
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// 当日已实现亏损上限 (金额)
    pub daily_loss_limit: f64,
    /// 单标的持仓金额上限
    pub max_position_size: f64,
    /// 账户回撤阈值，仅 `DrawdownScope::Account` 使用
    pub account_max_drawdown: Percentage,
    pub drawdown_scope: DrawdownScope,
    /// 同时持有的标的数上限，None 不限制
    #[serde(default)]
    pub max_open_positions: Option<u32>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            daily_loss_limit: 500.0,
            max_position_size: 10_000.0,
            account_max_drawdown: Percentage::new(15.0).unwrap_or_else(|_| Percentage::zero()),
            drawdown_scope: DrawdownScope::Strategy,
            max_open_positions: None,
        }
    }
}

/// 周预算配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSettings {
    pub weekly_budget: f64,
    pub reinvest_profits: bool,
    pub reinvest_pct: Percentage,
    pub auto_scale: bool,
    pub auto_scale_pct: Percentage,
    /// 连续盈利多少周后扩容
    pub auto_scale_after_weeks: u32,
    /// 扩容上限 (基础预算的倍数)
    pub max_scale_multiple: f64,
    /// 本周已实现亏损上限 (占周预算)，None 不限制
    #[serde(default)]
    pub max_weekly_loss: Option<Percentage>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            weekly_budget: 200.0,
            reinvest_profits: true,
            reinvest_pct: Percentage::new(50.0).unwrap_or_else(|_| Percentage::zero()),
            auto_scale: false,
            auto_scale_pct: Percentage::new(10.0).unwrap_or_else(|_| Percentage::zero()),
            auto_scale_after_weeks: 2,
            max_scale_multiple: 3.0,
            max_weekly_loss: None,
        }
    }
}
