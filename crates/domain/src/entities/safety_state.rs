//! 安全状态: 总开关、连续亏损、权益峰值、当日亏损

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 一条权益曲线的当前值与峰值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityTrack {
    pub current: f64,
    pub peak: f64,
}

impl EquityTrack {
    pub fn new(equity: f64) -> Self {
        Self {
            current: equity,
            peak: equity,
        }
    }

    pub fn mark(&mut self, equity: f64) {
        self.current = equity;
        if equity > self.peak {
            self.peak = equity;
        }
    }

    /// 距峰值回撤百分比
    pub fn drawdown_pct(&self) -> f64 {
        if self.peak <= 0.0 {
            return 0.0;
        }
        ((self.peak - self.current) / self.peak * 100.0).max(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    /// 总开关，只能由人工命令解除
    pub kill_switch: bool,
    pub kill_switch_reason: Option<String>,
    pub kill_switch_engaged_at: Option<DateTime<Utc>>,
    /// 策略ID -> 连续亏损笔数
    pub consecutive_losses: BTreeMap<String, u32>,
    /// 账户权益曲线
    pub account_equity: Option<EquityTrack>,
    /// 策略ID -> 策略权益曲线
    pub strategy_equity: BTreeMap<String, EquityTrack>,
    /// 策略ID -> 累计已实现盈亏
    pub strategy_realized_pnl: BTreeMap<String, f64>,
    /// 当日已实现亏损 (正数)
    pub realized_loss_today: f64,
    pub session_date: Option<NaiveDate>,
    pub last_broker_sync: Option<DateTime<Utc>>,
}

impl SafetyState {
    /// 打开总开关，返回是否为首次打开
    pub fn engage_kill_switch(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.kill_switch {
            return false;
        }
        self.kill_switch = true;
        self.kill_switch_reason = Some(reason.into());
        self.kill_switch_engaged_at = Some(now);
        true
    }

    /// 人工解除总开关
    pub fn release_kill_switch(&mut self) {
        self.kill_switch = false;
        self.kill_switch_reason = None;
        self.kill_switch_engaged_at = None;
    }

    /// 记录一笔完整交易的平仓结果
    ///
    /// 亏损 +1，盈利清零，持平不变；亏损额计入当日亏损。
    pub fn record_trade_result(&mut self, strategy_id: &str, pnl: f64) {
        self.record_realized(strategy_id, pnl);
        self.record_trade_outcome(strategy_id, pnl);
    }

    /// 计入已实现盈亏 (含部分平仓)，不影响连亏计数
    pub fn record_realized(&mut self, strategy_id: &str, pnl: f64) {
        if pnl < 0.0 {
            self.realized_loss_today += -pnl;
        }
        *self
            .strategy_realized_pnl
            .entry(strategy_id.to_string())
            .or_insert(0.0) += pnl;
    }

    /// 按整笔交易盈亏更新连亏计数
    pub fn record_trade_outcome(&mut self, strategy_id: &str, trade_pnl: f64) {
        let counter = self
            .consecutive_losses
            .entry(strategy_id.to_string())
            .or_insert(0);
        if trade_pnl < 0.0 {
            *counter += 1;
        } else if trade_pnl > 0.0 {
            *counter = 0;
        }
    }

    pub fn consecutive_losses_for(&self, strategy_id: &str) -> u32 {
        self.consecutive_losses.get(strategy_id).copied().unwrap_or(0)
    }

    pub fn reset_consecutive_losses(&mut self, strategy_id: &str) {
        self.consecutive_losses.insert(strategy_id.to_string(), 0);
    }

    pub fn realized_pnl_for(&self, strategy_id: &str) -> f64 {
        self.strategy_realized_pnl.get(strategy_id).copied().unwrap_or(0.0)
    }

    pub fn mark_account_equity(&mut self, equity: f64) {
        match self.account_equity.as_mut() {
            Some(track) => track.mark(equity),
            None => self.account_equity = Some(EquityTrack::new(equity)),
        }
    }

    pub fn mark_strategy_equity(&mut self, strategy_id: &str, equity: f64) {
        self.strategy_equity
            .entry(strategy_id.to_string())
            .and_modify(|t| t.mark(equity))
            .or_insert_with(|| EquityTrack::new(equity));
    }

    pub fn peak_equity(&self) -> Option<f64> {
        self.account_equity.map(|t| t.peak)
    }

    /// 人工重置回撤峰值为当前权益
    pub fn reset_drawdown_peak(&mut self) {
        if let Some(track) = self.account_equity.as_mut() {
            track.peak = track.current;
        }
        for track in self.strategy_equity.values_mut() {
            track.peak = track.current;
        }
    }

    /// 新交易日开盘时清零当日亏损，返回是否发生了切换
    pub fn roll_session(&mut self, date: NaiveDate) -> bool {
        if self.session_date == Some(date) {
            return false;
        }
        self.session_date = Some(date);
        self.realized_loss_today = 0.0;
        true
    }
}
