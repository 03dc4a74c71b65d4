//! 周预算状态

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 一次自动扩容记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub week_start: NaiveDate,
    pub from: f64,
    pub to: f64,
    pub profitable_weeks: u32,
}

/// 周度汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSummary {
    pub week_start: NaiveDate,
    pub budget: f64,
    pub used: f64,
    pub used_pct: f64,
    pub trade_count: u32,
    pub realized_pnl: f64,
    pub avg_trade_size: f64,
    /// 已实现盈亏 / 已用金额 (%)
    pub roi_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    /// 配置的基础周预算
    pub base_budget: f64,
    /// 自动扩容后的常规周预算
    pub standing_budget: f64,
    /// 本周可用预算 (常规预算 + 上周再投资)
    pub weekly_budget: f64,
    pub used: f64,
    pub trade_count: u32,
    /// 本周周一
    pub week_start: NaiveDate,
    pub week_realized_pnl: f64,
    /// 待计入下周预算的再投资金额
    pub reinvest_accumulator: f64,
    pub consecutive_profitable_weeks: u32,
    pub scale_events: Vec<ScaleEvent>,
    pub history: Vec<WeekSummary>,
}

impl BudgetState {
    pub fn new(base_budget: f64, week_start: NaiveDate) -> Self {
        Self {
            base_budget,
            standing_budget: base_budget,
            weekly_budget: base_budget,
            used: 0.0,
            trade_count: 0,
            week_start,
            week_realized_pnl: 0.0,
            reinvest_accumulator: 0.0,
            consecutive_profitable_weeks: 0,
            scale_events: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.weekly_budget - self.used).max(0.0)
    }

    pub fn summary(&self) -> WeekSummary {
        let pct = |num: f64, den: f64| if den > 0.0 { num / den * 100.0 } else { 0.0 };
        WeekSummary {
            week_start: self.week_start,
            budget: self.weekly_budget,
            used: self.used,
            used_pct: pct(self.used, self.weekly_budget),
            trade_count: self.trade_count,
            realized_pnl: self.week_realized_pnl,
            avg_trade_size: if self.trade_count > 0 {
                self.used / self.trade_count as f64
            } else {
                0.0
            },
            roi_pct: pct(self.week_realized_pnl, self.used),
        }
    }
}
