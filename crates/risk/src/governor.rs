//! 风控闸门
//!
//! 检查顺序 (第一个失败生效):
//! 1. 总开关
//! 2. 当日已实现亏损
//! 3. 策略连续亏损
//! 4. 回撤熔断 (策略或账户范围)
//! 5. 下单前检查: 购买力、同时持仓数、持仓上限、分批笔数

use dip_quant_domain::{DrawdownScope, RiskLimits, SafetyState, StrategyParameters};
use serde::{Deserialize, Serialize};

use crate::policies::{DrawdownPolicy, PositionLimitPolicy};

/// 风控规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    KillSwitch,
    DailyLossLimit,
    ConsecutiveLosses,
    Drawdown,
    BuyingPower,
    PositionSizeCap,
    MaxTranches,
    MaxPositions,
}

impl GateRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateRule::KillSwitch => "kill_switch",
            GateRule::DailyLossLimit => "daily_loss_limit",
            GateRule::ConsecutiveLosses => "consecutive_losses",
            GateRule::Drawdown => "drawdown",
            GateRule::BuyingPower => "buying_power",
            GateRule::PositionSizeCap => "position_size_cap",
            GateRule::MaxTranches => "max_tranches",
            GateRule::MaxPositions => "max_positions",
        }
    }
}

/// 拦截原因，恰好对应一条规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRejection {
    pub rule: GateRule,
    pub reason: String,
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule.as_str(), self.reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approved,
    Rejected(GateRejection),
}

impl Decision {
    fn reject(rule: GateRule, reason: impl Into<String>) -> Self {
        Decision::Rejected(GateRejection {
            rule,
            reason: reason.into(),
        })
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }

    pub fn rejection(&self) -> Option<&GateRejection> {
        match self {
            Decision::Approved => None,
            Decision::Rejected(r) => Some(r),
        }
    }

    pub fn rule(&self) -> Option<GateRule> {
        self.rejection().map(|r| r.rule)
    }
}

/// 策略级阈值
#[derive(Debug, Clone, Copy)]
pub struct StrategyGate<'a> {
    pub strategy_id: &'a str,
    pub max_consecutive_losses: u32,
    pub max_drawdown_pct: f64,
}

impl<'a> StrategyGate<'a> {
    pub fn new(strategy_id: &'a str, params: &StrategyParameters) -> Self {
        Self {
            strategy_id,
            max_consecutive_losses: params.max_consecutive_losses,
            max_drawdown_pct: params.max_drawdown_pct,
        }
    }
}

/// 一笔拟开仓订单
#[derive(Debug, Clone, Copy)]
pub struct EntryProposal<'a> {
    pub strategy: StrategyGate<'a>,
    pub symbol: &'a str,
    pub notional: f64,
    pub buying_power: f64,
    /// 该标的已有持仓市值
    pub current_position_value: f64,
    pub filled_tranches: u32,
    pub planned_tranches: u32,
    /// 当前持仓标的数 (所有策略)
    pub open_positions: usize,
    /// 开新仓而不是加仓
    pub is_new_position: bool,
}

#[derive(Debug, Clone)]
pub struct RiskGovernor {
    limits: RiskLimits,
}

impl RiskGovernor {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// 每个 tick 开始时的全局检查 (规则 1、2 及账户范围的规则 4)
    pub fn check_global(&self, safety: &SafetyState) -> Decision {
        if safety.kill_switch {
            let why = safety.kill_switch_reason.as_deref().unwrap_or("人工操作");
            return Decision::reject(GateRule::KillSwitch, format!("总开关已打开: {}", why));
        }
        if safety.realized_loss_today >= self.limits.daily_loss_limit {
            return Decision::reject(
                GateRule::DailyLossLimit,
                format!(
                    "当日已实现亏损 {:.2} 达到上限 {:.2}，下个交易日开盘恢复",
                    safety.realized_loss_today, self.limits.daily_loss_limit
                ),
            );
        }
        if self.limits.drawdown_scope == DrawdownScope::Account {
            if let Some(track) = safety.account_equity.as_ref() {
                let policy = DrawdownPolicy::new(self.limits.account_max_drawdown);
                if let Err(reason) = policy.check(track) {
                    return Decision::reject(GateRule::Drawdown, format!("账户回撤熔断: {}", reason));
                }
            }
        }
        Decision::Approved
    }

    /// 策略级检查 (规则 1-4)
    pub fn check_strategy(&self, safety: &SafetyState, gate: &StrategyGate<'_>) -> Decision {
        let global = self.check_global(safety);
        if !global.is_approved() {
            return global;
        }

        let losses = safety.consecutive_losses_for(gate.strategy_id);
        if losses >= gate.max_consecutive_losses {
            return Decision::reject(
                GateRule::ConsecutiveLosses,
                format!(
                    "策略 {} 连续亏损 {} 笔，达到阈值 {}，等待盈利交易或人工重置",
                    gate.strategy_id, losses, gate.max_consecutive_losses
                ),
            );
        }

        if self.limits.drawdown_scope == DrawdownScope::Strategy {
            if let Some(track) = safety.strategy_equity.get(gate.strategy_id) {
                let policy = DrawdownPolicy::from_pct(gate.max_drawdown_pct);
                if let Err(reason) = policy.check(track) {
                    return Decision::reject(
                        GateRule::Drawdown,
                        format!("策略 {} 回撤熔断: {}", gate.strategy_id, reason),
                    );
                }
            }
        }
        Decision::Approved
    }

    /// 开仓前完整检查 (规则 1-5)
    pub fn check_entry(&self, safety: &SafetyState, proposal: &EntryProposal<'_>) -> Decision {
        let strategy = self.check_strategy(safety, &proposal.strategy);
        if !strategy.is_approved() {
            return strategy;
        }

        let policy = PositionLimitPolicy::new(self.limits.max_position_size)
            .with_max_open_positions(self.limits.max_open_positions);
        if let Err(reason) = policy.check_buying_power(proposal.notional, proposal.buying_power) {
            return Decision::reject(GateRule::BuyingPower, format!("{}: {}", proposal.symbol, reason));
        }
        if proposal.is_new_position {
            if let Err(reason) = policy.check_open_positions(proposal.open_positions) {
                return Decision::reject(
                    GateRule::MaxPositions,
                    format!("{}: {}", proposal.symbol, reason),
                );
            }
        }
        if let Err(reason) =
            policy.check_position_size(proposal.current_position_value, proposal.notional)
        {
            return Decision::reject(
                GateRule::PositionSizeCap,
                format!("{}: {}", proposal.symbol, reason),
            );
        }
        if let Err(reason) =
            policy.check_tranches(proposal.filled_tranches, proposal.planned_tranches)
        {
            return Decision::reject(GateRule::MaxTranches, format!("{}: {}", proposal.symbol, reason));
        }
        Decision::Approved
    }

    /// 平仓单只受总开关约束
    pub fn check_exit(&self, safety: &SafetyState) -> Decision {
        if safety.kill_switch {
            return Decision::reject(GateRule::KillSwitch, "总开关已打开，不提交任何新订单");
        }
        Decision::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dip_quant_domain::Percentage;

    fn limits(scope: DrawdownScope) -> RiskLimits {
        RiskLimits {
            daily_loss_limit: 100.0,
            max_position_size: 1000.0,
            account_max_drawdown: Percentage::new(10.0).unwrap(),
            drawdown_scope: scope,
            max_open_positions: Some(2),
        }
    }

    fn gate(id: &str) -> StrategyGate<'_> {
        StrategyGate {
            strategy_id: id,
            max_consecutive_losses: 2,
            max_drawdown_pct: 10.0,
        }
    }

    fn proposal<'a>(id: &'a str) -> EntryProposal<'a> {
        EntryProposal {
            strategy: gate(id),
            symbol: "SPY",
            notional: 50.0,
            buying_power: 10_000.0,
            current_position_value: 0.0,
            filled_tranches: 0,
            planned_tranches: 2,
            open_positions: 0,
            is_new_position: true,
        }
    }

    #[test]
    fn test_account_drawdown_threshold() {
        let governor = RiskGovernor::new(limits(DrawdownScope::Account));
        let mut safety = SafetyState::default();
        safety.mark_account_equity(1000.0);

        safety.mark_account_equity(899.0);
        assert_eq!(governor.check_global(&safety).rule(), Some(GateRule::Drawdown));

        safety.mark_account_equity(901.0);
        assert!(governor.check_global(&safety).is_approved());
    }

    #[test]
    fn test_strategy_drawdown_halts_only_that_strategy() {
        let governor = RiskGovernor::new(limits(DrawdownScope::Strategy));
        let mut safety = SafetyState::default();
        safety.mark_strategy_equity("a", 1000.0);
        safety.mark_strategy_equity("a", 899.0);
        safety.mark_strategy_equity("b", 1000.0);
        // 账户本身大幅回撤，但范围是策略级
        safety.mark_account_equity(1000.0);
        safety.mark_account_equity(500.0);

        assert_eq!(
            governor.check_strategy(&safety, &gate("a")).rule(),
            Some(GateRule::Drawdown)
        );
        assert!(governor.check_strategy(&safety, &gate("b")).is_approved());

        safety.mark_strategy_equity("a", 901.0);
        assert!(governor.check_strategy(&safety, &gate("a")).is_approved());
    }

    #[test]
    fn test_consecutive_losses_breaker() {
        let governor = RiskGovernor::new(limits(DrawdownScope::Strategy));
        let mut safety = SafetyState::default();

        safety.record_trade_result("a", -5.0);
        safety.record_trade_result("a", 4.0);
        assert_eq!(safety.consecutive_losses_for("a"), 0);
        assert!(governor.check_entry(&safety, &proposal("a")).is_approved());

        safety.record_trade_result("a", -5.0);
        safety.record_trade_result("a", -5.0);
        assert_eq!(
            governor.check_entry(&safety, &proposal("a")).rule(),
            Some(GateRule::ConsecutiveLosses)
        );
        assert!(governor.check_entry(&safety, &proposal("b")).is_approved());

        safety.reset_consecutive_losses("a");
        assert!(governor.check_entry(&safety, &proposal("a")).is_approved());
    }

    #[test]
    fn test_order_of_checks() {
        let governor = RiskGovernor::new(limits(DrawdownScope::Strategy));
        let mut safety = SafetyState::default();
        safety.record_trade_result("a", -60.0);
        safety.record_trade_result("a", -60.0);
        // 当日亏损与连续亏损同时触发，先报当日亏损
        assert_eq!(
            governor.check_entry(&safety, &proposal("a")).rule(),
            Some(GateRule::DailyLossLimit)
        );
        safety.engage_kill_switch("panic", Utc::now());
        assert_eq!(
            governor.check_entry(&safety, &proposal("a")).rule(),
            Some(GateRule::KillSwitch)
        );
        assert_eq!(governor.check_exit(&safety).rule(), Some(GateRule::KillSwitch));
    }

    #[test]
    fn test_daily_loss_does_not_block_exits() {
        let governor = RiskGovernor::new(limits(DrawdownScope::Strategy));
        let mut safety = SafetyState::default();
        safety.record_trade_result("a", -150.0);
        assert!(!governor.check_global(&safety).is_approved());
        assert!(governor.check_exit(&safety).is_approved());
    }

    #[test]
    fn test_preflight_rules() {
        let governor = RiskGovernor::new(limits(DrawdownScope::Strategy));
        let safety = SafetyState::default();

        let mut p = proposal("a");
        p.buying_power = 10.0;
        assert_eq!(governor.check_entry(&safety, &p).rule(), Some(GateRule::BuyingPower));

        let mut p = proposal("a");
        p.current_position_value = 980.0;
        assert_eq!(governor.check_entry(&safety, &p).rule(), Some(GateRule::PositionSizeCap));

        let mut p = proposal("a");
        p.filled_tranches = 2;
        let decision = governor.check_entry(&safety, &p);
        assert_eq!(decision.rule(), Some(GateRule::MaxTranches));
        assert!(decision.rejection().unwrap().reason.contains("SPY"));
    }

    #[test]
    fn test_max_positions_only_blocks_new_symbols() {
        let governor = RiskGovernor::new(limits(DrawdownScope::Strategy));
        let safety = SafetyState::default();

        let mut p = proposal("a");
        p.open_positions = 2;
        let decision = governor.check_entry(&safety, &p);
        assert_eq!(decision.rule(), Some(GateRule::MaxPositions));

        // 已有持仓的加仓不受限
        p.is_new_position = false;
        assert!(governor.check_entry(&safety, &p).is_approved());

        let unlimited = RiskGovernor::new(RiskLimits {
            max_open_positions: None,
            ..limits(DrawdownScope::Strategy)
        });
        let mut p = proposal("a");
        p.open_positions = 50;
        assert!(unlimited.check_entry(&safety, &p).is_approved());
    }
}
