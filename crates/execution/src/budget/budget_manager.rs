//! 周预算管理
//!
//! 只在两个检查点修改预算: 周切换 (`roll_over`) 和平仓结算 (`record_realized`)。
//! 盈利的再投资部分累积到下一周生效；连续盈利周达到阈值后按比例上调，
//! 上限为基础预算的 `max_scale_multiple` 倍，从不自动下调。

use chrono::NaiveDate;
use dip_quant_common::utils::week_start;
use dip_quant_domain::{BudgetSettings, BudgetState, WeekSummary};
use dip_quant_domain::entities::ScaleEvent;
use thiserror::Error;
use tracing::info;

/// 保留的历史周数
const HISTORY_WEEKS: usize = 52;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetRejection {
    #[error("下单金额无效: {0}")]
    InvalidAmount(f64),

    #[error("本周预算不足: 需要 {requested:.2}，剩余 {remaining:.2}")]
    Exceeded { requested: f64, remaining: f64 },

    #[error("本周已实现亏损 {loss:.2} 超过上限 {limit:.2}")]
    WeeklyLossLimit { loss: f64, limit: f64 },
}

#[derive(Debug, Clone)]
pub struct BudgetManager {
    settings: BudgetSettings,
}

impl BudgetManager {
    pub fn new(settings: BudgetSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BudgetSettings {
        &self.settings
    }

    pub fn new_state(&self, today: NaiveDate) -> BudgetState {
        BudgetState::new(self.settings.weekly_budget, week_start(today))
    }

    /// 进入新的一周时结算上一周，返回上一周的汇总
    pub fn roll_over(&self, state: &mut BudgetState, today: NaiveDate) -> Option<WeekSummary> {
        let current = week_start(today);
        if current <= state.week_start {
            return None;
        }

        let summary = state.summary();
        state.history.push(summary.clone());
        if state.history.len() > HISTORY_WEEKS {
            let overflow = state.history.len() - HISTORY_WEEKS;
            state.history.drain(..overflow);
        }

        if state.week_realized_pnl > 0.0 {
            state.consecutive_profitable_weeks += 1;
        } else if state.week_realized_pnl < 0.0 {
            state.consecutive_profitable_weeks = 0;
        }

        if self.settings.auto_scale
            && state.consecutive_profitable_weeks >= self.settings.auto_scale_after_weeks
        {
            let cap = state.base_budget * self.settings.max_scale_multiple;
            let scaled = (state.standing_budget * (1.0 + self.settings.auto_scale_pct.as_ratio()))
                .min(cap);
            if scaled > state.standing_budget {
                info!(
                    "周预算自动上调: {:.2} -> {:.2} (连续盈利 {} 周)",
                    state.standing_budget, scaled, state.consecutive_profitable_weeks
                );
                state.scale_events.push(ScaleEvent {
                    week_start: current,
                    from: state.standing_budget,
                    to: scaled,
                    profitable_weeks: state.consecutive_profitable_weeks,
                });
                state.standing_budget = scaled;
            }
        }

        let carried = if self.settings.reinvest_profits {
            state.reinvest_accumulator
        } else {
            0.0
        };
        state.weekly_budget = state.standing_budget + carried;
        state.reinvest_accumulator = 0.0;
        state.used = 0.0;
        state.trade_count = 0;
        state.week_realized_pnl = 0.0;
        state.week_start = current;

        info!(
            "进入新的一周 {}: 预算 {:.2} (再投资 {:.2})",
            current, state.weekly_budget, carried
        );
        Some(summary)
    }

    pub fn can_spend(&self, state: &BudgetState, amount: f64) -> Result<(), BudgetRejection> {
        if !(amount > 0.0 && amount.is_finite()) {
            return Err(BudgetRejection::InvalidAmount(amount));
        }
        if let Some(pct) = self.settings.max_weekly_loss {
            let loss = -state.week_realized_pnl;
            let limit = pct.of(state.weekly_budget);
            if loss > limit {
                return Err(BudgetRejection::WeeklyLossLimit { loss, limit });
            }
        }
        let remaining = state.remaining();
        if amount > remaining + 1e-9 {
            return Err(BudgetRejection::Exceeded {
                requested: amount,
                remaining,
            });
        }
        Ok(())
    }

    pub fn record_spend(&self, state: &mut BudgetState, amount: f64) {
        state.used += amount.max(0.0);
        state.trade_count += 1;
    }

    /// 平仓结算，盈利按比例计入下周再投资
    pub fn record_realized(&self, state: &mut BudgetState, pnl: f64) {
        state.week_realized_pnl += pnl;
        if self.settings.reinvest_profits && pnl > 0.0 {
            state.reinvest_accumulator += self.settings.reinvest_pct.of(pnl);
        }
    }
}
