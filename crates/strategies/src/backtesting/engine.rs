//! 回测引擎
//!
//! 多标的按时间轴逐根回放日线，入场/出场调用与实盘相同的函数，
//! 每笔入场同样经过 `RiskGovernor`。

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate};
use dip_quant_common::utils::{date_to_ms, ms_to_date};
use dip_quant_common::Bar;
use dip_quant_domain::{
    DrawdownScope, ExitReason, Percentage, Position, RiskLimits, SafetyState, StrategyParameters,
    TrancheFill,
};
use dip_quant_risk::{Decision, EntryProposal, GateRule, RiskGovernor, StrategyGate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::metrics::{
    calculate_max_drawdown, calculate_sharpe_ratio, calculate_sortino_ratio, calculate_win_rate,
    period_returns,
};
use crate::exit::evaluate_exit;
use crate::signal::{evaluate_entry, EntryDecision};

const BACKTEST_STRATEGY_ID: &str = "backtest";

/// 回测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// 初始资金
    pub initial_capital: f64,
    /// 单边手续费 (基点)，仅在券商另行收费时设为 0
    pub fee_bps: f64,
    /// 市价单滑点 (基点)
    pub slippage_bps: f64,
    /// 年化系数 (日线 252)
    pub annualization: f64,
    /// 当日亏损上限，`None` 表示不限制
    pub daily_loss_limit: Option<f64>,
    /// 单标的持仓金额上限，`None` 表示不限制
    pub max_position_size: Option<f64>,
    /// 连续亏损或回撤熔断后，经过多少个交易日模拟人工重置
    pub halt_cooldown_sessions: u32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            fee_bps: 5.0,
            slippage_bps: 2.0,
            annualization: 252.0,
            daily_loss_limit: None,
            max_position_size: None,
            halt_cooldown_sessions: 5,
        }
    }
}

impl BacktestConfig {
    fn fee(&self, notional: f64) -> f64 {
        notional.abs() * self.fee_bps.max(0.0) / 10_000.0
    }

    fn slip(&self) -> f64 {
        self.slippage_bps.max(0.0) / 10_000.0
    }
}

/// 交易记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    /// 首笔成交时间 (毫秒)
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub tranches: u32,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub exit_price: f64,
    /// 扣除双边手续费后的盈亏
    pub pnl: f64,
    pub return_pct: f64,
    pub fees: f64,
    pub reason: ExitReason,
}

/// 回测报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestReport {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub trades: Vec<TradeRecord>,
    /// 每个交易日收盘后的 (时间戳, 权益)
    pub equity_curve: Vec<(i64, f64)>,
    /// 按规则统计的风控拦截次数
    pub risk_rejections: BTreeMap<String, usize>,
}

/// 截取日期区间内的K线 (含首尾)
pub fn slice_by_date(bars: &[Bar], start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<Bar> {
    bars.iter()
        .filter(|b| match b.date() {
            Some(d) => start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e),
            None => false,
        })
        .copied()
        .collect()
}

/// 回测引擎
pub struct BacktestEngine {
    config: BacktestConfig,
}

struct SimState {
    cash: f64,
    positions: BTreeMap<String, Position>,
    last_close: BTreeMap<String, f64>,
    trades: Vec<TradeRecord>,
    safety: SafetyState,
    halted_at_session: Option<u32>,
    sessions: u32,
    rejections: BTreeMap<String, usize>,
}

impl SimState {
    fn equity(&self) -> f64 {
        self.cash
            + self
                .positions
                .iter()
                .map(|(symbol, pos)| {
                    let price = self
                        .last_close
                        .get(symbol)
                        .copied()
                        .unwrap_or(pos.avg_entry_price);
                    pos.market_value(price)
                })
                .sum::<f64>()
    }
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn governor(&self) -> RiskGovernor {
        RiskGovernor::new(RiskLimits {
            daily_loss_limit: self.config.daily_loss_limit.unwrap_or(f64::MAX),
            max_position_size: self.config.max_position_size.unwrap_or(f64::MAX),
            account_max_drawdown: Percentage::zero(),
            drawdown_scope: DrawdownScope::Strategy,
            max_open_positions: None,
        })
    }

    /// 执行回测，`series` 为 标的 -> 按时间升序的日线
    pub fn run(
        &self,
        params: &StrategyParameters,
        series: &BTreeMap<String, Vec<Bar>>,
    ) -> BacktestReport {
        self.run_from(params, series, None)
    }

    /// 从 `trade_from` 当天开始交易，之前的K线只作为指标预热数据
    pub fn run_from(
        &self,
        params: &StrategyParameters,
        series: &BTreeMap<String, Vec<Bar>>,
        trade_from: Option<NaiveDate>,
    ) -> BacktestReport {
        let trade_from_ms = trade_from.map(date_to_ms);
        let governor = self.governor();
        let gate = StrategyGate::new(BACKTEST_STRATEGY_ID, params);

        let mut state = SimState {
            cash: self.config.initial_capital,
            positions: BTreeMap::new(),
            last_close: BTreeMap::new(),
            trades: Vec::new(),
            safety: SafetyState::default(),
            halted_at_session: None,
            sessions: 0,
            rejections: BTreeMap::new(),
        };
        state
            .safety
            .mark_strategy_equity(BACKTEST_STRATEGY_ID, self.config.initial_capital);

        let timeline: BTreeSet<i64> = series.values().flatten().map(|b| b.ts).collect();
        let mut cursors: BTreeMap<&str, usize> = series.keys().map(|s| (s.as_str(), 0)).collect();
        let mut equity_curve: Vec<(i64, f64)> = Vec::with_capacity(timeline.len());

        for &ts in timeline.iter().filter(|&&ts| trade_from_ms.map_or(true, |t| ts >= t)) {
            if let Some(date) = ms_to_date(ts) {
                if state.safety.roll_session(date) {
                    state.sessions += 1;
                    self.apply_cooldown(&mut state);
                }
            }

            for (symbol, bars) in series {
                let Some(cursor) = cursors.get_mut(symbol.as_str()) else {
                    continue;
                };
                while *cursor < bars.len() && bars[*cursor].ts < ts {
                    *cursor += 1;
                }
                if *cursor >= bars.len() || bars[*cursor].ts != ts {
                    continue;
                }
                let idx = *cursor;
                let bar = bars[idx];
                state.last_close.insert(symbol.clone(), bar.close);

                if self.process_exit(params, &mut state, symbol, &bar) {
                    continue;
                }
                self.process_entry(params, &governor, &gate, &mut state, symbol, &bars[..=idx]);
            }

            let equity = state.equity();
            state
                .safety
                .mark_strategy_equity(BACKTEST_STRATEGY_ID, equity);
            equity_curve.push((ts, equity));
        }

        let open: Vec<String> = state.positions.keys().cloned().collect();
        if let Some(&last_ts) = timeline.iter().next_back() {
            for symbol in open {
                if let Some(price) = state.last_close.get(&symbol).copied() {
                    self.close_position(&mut state, &symbol, price, last_ts, ExitReason::EndOfData);
                }
            }
            if let Some(last) = equity_curve.last_mut() {
                last.1 = state.equity();
            }
        }

        self.build_report(state, equity_curve)
    }

    fn apply_cooldown(&self, state: &mut SimState) {
        if let Some(since) = state.halted_at_session {
            if state.sessions.saturating_sub(since) >= self.config.halt_cooldown_sessions {
                debug!("回测熔断冷却结束，重置连续亏损与回撤峰值");
                state.safety.reset_consecutive_losses(BACKTEST_STRATEGY_ID);
                state.safety.reset_drawdown_peak();
                state.halted_at_session = None;
            }
        }
    }

    /// 处理出场，返回本根K线是否平仓
    fn process_exit(
        &self,
        params: &StrategyParameters,
        state: &mut SimState,
        symbol: &str,
        bar: &Bar,
    ) -> bool {
        let Some(pos) = state.positions.get_mut(symbol) else {
            return false;
        };
        match evaluate_exit(params, pos, bar) {
            Some(signal) => {
                let price = match signal.reason {
                    ExitReason::TakeProfit => signal.price,
                    _ => signal.price * (1.0 - self.config.slip()),
                };
                self.close_position(state, symbol, price, bar.ts, signal.reason);
                true
            }
            None => {
                pos.ratchet_high(bar.high);
                false
            }
        }
    }

    fn process_entry(
        &self,
        params: &StrategyParameters,
        governor: &RiskGovernor,
        gate: &StrategyGate<'_>,
        state: &mut SimState,
        symbol: &str,
        history: &[Bar],
    ) {
        let Some(bar) = history.last() else {
            return;
        };
        let equity = state.equity();
        let position = state.positions.get(symbol);
        let EntryDecision::Enter(signal) = evaluate_entry(params, history, position, equity) else {
            return;
        };

        let proposal = EntryProposal {
            strategy: *gate,
            symbol,
            notional: signal.notional,
            buying_power: state.cash,
            current_position_value: position.map_or(0.0, |p| p.market_value(bar.close)),
            filled_tranches: position.map_or(0, |p| p.filled_tranches()),
            planned_tranches: params.dca_tranches.max(1),
            open_positions: state.positions.len(),
            is_new_position: position.is_none(),
        };
        if let Decision::Rejected(rejection) = governor.check_entry(&state.safety, &proposal) {
            *state
                .rejections
                .entry(rejection.rule.as_str().to_string())
                .or_insert(0) += 1;
            if matches!(
                rejection.rule,
                GateRule::ConsecutiveLosses | GateRule::Drawdown
            ) && state.halted_at_session.is_none()
            {
                state.halted_at_session = Some(state.sessions);
            }
            return;
        }

        let price = signal.reference_price * (1.0 + self.config.slip());
        let fee = self.config.fee(signal.notional);
        if signal.notional + fee > state.cash {
            return;
        }
        let Some(filled_at) = DateTime::from_timestamp_millis(bar.ts) else {
            return;
        };
        let fill = TrancheFill {
            index: signal.tranche,
            quantity: signal.notional / price,
            price,
            fee,
            filled_at,
        };

        let applied = match state.positions.get_mut(symbol) {
            Some(pos) => pos.apply_fill(fill).is_ok(),
            None => match Position::open(
                BACKTEST_STRATEGY_ID,
                symbol,
                params.dca_tranches,
                fill,
                signal.atr,
            ) {
                Ok(pos) => {
                    state.positions.insert(symbol.to_string(), pos);
                    true
                }
                Err(_) => false,
            },
        };
        if applied {
            state.cash -= signal.notional + fee;
        }
    }

    fn close_position(
        &self,
        state: &mut SimState,
        symbol: &str,
        price: f64,
        ts: i64,
        reason: ExitReason,
    ) {
        let Some(pos) = state.positions.remove(symbol) else {
            return;
        };
        let proceeds = pos.quantity * price;
        let exit_fee = self.config.fee(proceeds);
        let pnl = pos.realized_pnl(price, exit_fee);
        state.cash += proceeds - exit_fee;
        state.safety.record_trade_result(BACKTEST_STRATEGY_ID, pnl);

        let entry_ts = pos.opened_at.timestamp_millis();
        state.trades.push(TradeRecord {
            symbol: symbol.to_string(),
            entry_ts,
            exit_ts: ts,
            tranches: pos.filled_tranches(),
            quantity: pos.quantity,
            avg_entry_price: pos.avg_entry_price,
            exit_price: price,
            pnl,
            return_pct: if pos.cost_basis > 0.0 {
                pnl / pos.cost_basis * 100.0
            } else {
                0.0
            },
            fees: pos.fees_paid + exit_fee,
            reason,
        });
    }

    fn build_report(&self, state: SimState, equity_curve: Vec<(i64, f64)>) -> BacktestReport {
        let initial = self.config.initial_capital;
        let final_equity = equity_curve.last().map_or(initial, |p| p.1);
        let values: Vec<f64> = std::iter::once(initial)
            .chain(equity_curve.iter().map(|p| p.1))
            .collect();
        let returns = period_returns(&values);
        let pnls: Vec<f64> = state.trades.iter().map(|t| t.pnl).collect();

        BacktestReport {
            initial_capital: initial,
            final_equity,
            total_return_pct: if initial > 0.0 {
                (final_equity / initial - 1.0) * 100.0
            } else {
                0.0
            },
            total_trades: state.trades.len(),
            win_rate_pct: calculate_win_rate(&pnls),
            max_drawdown_pct: calculate_max_drawdown(&values),
            sharpe: calculate_sharpe_ratio(&returns, self.config.annualization),
            sortino: calculate_sortino_ratio(&returns, self.config.annualization),
            trades: state.trades,
            equity_curve,
            risk_rejections: state.rejections,
        }
    }
}
