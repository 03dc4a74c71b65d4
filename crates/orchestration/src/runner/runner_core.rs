//! 运行器核心
//!
//! `RunnerCore` 持有运行器的全部可变状态 (RunnerState / SafetyState / BudgetState / 持仓簿)。
//! 它本身不加锁，由 `RunnerManager` 用同一把互斥锁串行化 tick 与人工命令。
//!
//! 一次开盘 tick 的顺序:
//! 1. 休眠中则恢复运行，本次评估即为补偿评估
//! 2. 交易日切换 (清零当日亏损) 与周预算切换
//! 3. 轮询券商: 连接、账户、持仓，并核对在途订单
//! 4. 逐个策略、逐个标的: 先出场后入场，订单经风控与预算后提交
//! 5. 持久化

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dip_quant_common::{AppError, Bar};
use dip_quant_domain::entities::STATE_VERSION;
use dip_quant_domain::{
    AccountSnapshot, Broker, BrokerPosition, BudgetSettings, BudgetState, ExitReason, OrderAck,
    OrderIntent, OrderRequest, OrderSide, PersistedState, RiskLimits, RunnerState, RunnerStatus,
    SafetyState, StateRepository, StrategyConfig, StrategyConfigRepository, TrancheFill,
};
use dip_quant_execution::{
    with_timeout_retry, BudgetManager, LiquidationReport, OrderExecutor, PositionBook, RetryPolicy,
};
use dip_quant_market::{MarketClock, SessionState};
use dip_quant_risk::{Decision, EntryProposal, GateRule, RiskGovernor, StrategyGate};
use dip_quant_strategies::{evaluate_entry, evaluate_exit, size_tranche, warmup_bars, EntryDecision};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::RunnerCommandError;

pub const MIN_TICK_INTERVAL_SECS: u64 = 5;
pub const MAX_TICK_INTERVAL_SECS: u64 = 3600;

/// 每次拉取的日线数量 (指标预热之外多留一段)
fn bar_lookback() -> usize {
    warmup_bars() + 60
}

/// 运行器依赖的外部组件
#[derive(Clone)]
pub struct RunnerDeps {
    pub broker: Arc<dyn Broker>,
    pub clock: MarketClock,
    pub state_repo: Arc<dyn StateRepository>,
    pub strategy_repo: Arc<dyn StrategyConfigRepository>,
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub tick_interval_secs: u64,
    pub risk: RiskLimits,
    pub budget: BudgetSettings,
    pub retry: RetryPolicy,
    pub throttle_per_minute: u32,
}

impl RunnerOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(MIN_TICK_INTERVAL_SECS..=MAX_TICK_INTERVAL_SECS).contains(&self.tick_interval_secs) {
            return Err(AppError::Config(format!(
                "tick 间隔 {}s 超出范围 {}-{}s",
                self.tick_interval_secs, MIN_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS
            )));
        }
        if self.throttle_per_minute == 0 {
            return Err(AppError::Config("每分钟下单上限必须大于 0".to_string()));
        }
        Ok(())
    }
}

/// 单次 tick 的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// 运行器未启动，什么也不做
    Idle,
    Sleeping {
        next_open: Option<DateTime<Utc>>,
    },
    /// 轮询失败，本次跳过评估
    PollFailed {
        error: String,
    },
    /// 致命错误，运行器进入 ERROR
    Halted {
        reason: String,
    },
    Evaluated {
        catch_up: bool,
        orders: usize,
    },
}

/// 启动时恢复持久化状态的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Fresh,
    Restored { was_active: bool },
    /// 状态文件损坏: 运行器置为 ERROR 并打开总开关
    Corrupted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub kill_switch: bool,
    pub kill_switch_reason: Option<String>,
    pub last_broker_sync: Option<DateTime<Utc>>,
    pub current_equity: Option<f64>,
    pub peak_equity: Option<f64>,
    pub realized_loss_today: f64,
    pub consecutive_losses: BTreeMap<String, u32>,
    pub budget_remaining: f64,
}

/// 下单前检查: 标的 → 是否允许 + 原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preflight {
    pub symbol: String,
    pub allowed: bool,
    /// 拦截的风控规则，配置类原因为 None
    pub rule: Option<GateRule>,
    pub reason: String,
}

impl Preflight {
    fn blocked(symbol: &str, rule: Option<GateRule>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            allowed: false,
            rule,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanicStopReport {
    /// 本次调用是否新打开了总开关
    pub kill_switch_engaged: bool,
    /// 已撤销的在途入场单
    pub canceled_entries: Vec<String>,
    pub liquidation: LiquidationReport,
}

/// 在途订单，成交后才写入持仓簿和预算
#[derive(Debug, Clone)]
struct PendingOrder {
    strategy_id: String,
    symbol: String,
    intent: OrderIntent,
    planned_tranches: u32,
    entry_atr: Option<f64>,
    /// 触发入场的 K 线，出场判断从下一根开始
    bar_ts: Option<i64>,
    /// 紧急停止后仍成交的入场单需要立即清仓
    liquidate_on_fill: bool,
}

impl PendingOrder {
    fn exit(strategy_id: &str, symbol: &str, reason: ExitReason) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            symbol: symbol.to_string(),
            intent: OrderIntent::Exit { reason },
            planned_tranches: 0,
            entry_atr: None,
            bar_ts: None,
            liquidate_on_fill: false,
        }
    }

    fn is_entry(&self) -> bool {
        matches!(self.intent, OrderIntent::Entry { .. })
    }
}

pub struct RunnerCore {
    pub(crate) runner: RunnerState,
    pub(crate) safety: SafetyState,
    pub(crate) budget: BudgetState,
    pub(crate) book: PositionBook,
    governor: RiskGovernor,
    budget_manager: BudgetManager,
    executor: OrderExecutor,
    clock: MarketClock,
    retry: RetryPolicy,
    state_repo: Arc<dyn StateRepository>,
    strategy_repo: Arc<dyn StrategyConfigRepository>,
    pending: BTreeMap<String, PendingOrder>,
    account: Option<AccountSnapshot>,
    prices: BTreeMap<String, f64>,
}

impl RunnerCore {
    pub fn new(deps: RunnerDeps, options: RunnerOptions, now: DateTime<Utc>) -> Self {
        let budget_manager = BudgetManager::new(options.budget.clone());
        let budget = budget_manager.new_state(deps.clock.local_date(now));
        Self {
            runner: RunnerState::stopped(Vec::new(), options.tick_interval_secs),
            safety: SafetyState::default(),
            budget,
            book: PositionBook::new(),
            governor: RiskGovernor::new(options.risk),
            budget_manager,
            executor: OrderExecutor::new(
                deps.broker,
                options.retry,
                options.throttle_per_minute,
            ),
            clock: deps.clock,
            retry: options.retry,
            state_repo: deps.state_repo,
            strategy_repo: deps.strategy_repo,
            pending: BTreeMap::new(),
            account: None,
            prices: BTreeMap::new(),
        }
    }

    pub fn runner(&self) -> &RunnerState {
        &self.runner
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn budget(&self) -> &BudgetState {
        &self.budget
    }

    pub fn pending_orders(&self) -> usize {
        self.pending.len()
    }

    pub fn safety_status(&self) -> SafetyStatus {
        SafetyStatus {
            kill_switch: self.safety.kill_switch,
            kill_switch_reason: self.safety.kill_switch_reason.clone(),
            last_broker_sync: self.safety.last_broker_sync,
            current_equity: self.safety.account_equity.map(|t| t.current),
            peak_equity: self.safety.peak_equity(),
            realized_loss_today: self.safety.realized_loss_today,
            consecutive_losses: self.safety.consecutive_losses.clone(),
            budget_remaining: self.budget.remaining(),
        }
    }

    fn snapshot(&self, now: DateTime<Utc>) -> PersistedState {
        PersistedState {
            version: STATE_VERSION,
            runner: self.runner.clone(),
            safety: self.safety.clone(),
            budget: self.budget.clone(),
            positions: self.book.to_vec(),
            saved_at: now,
        }
    }

    pub async fn persist(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.state_repo.save(&self.snapshot(now)).await
    }

    /// 读取持久化状态
    ///
    /// 上次处于运行/休眠的运行器恢复为 STOPPED (保留策略集合与 tick 间隔)，
    /// 是否自动重启由调用方决定。ERROR 状态原样保留。
    pub async fn restore(&mut self) -> Result<RestoreOutcome, AppError> {
        match self.state_repo.load().await {
            Ok(Some(saved)) => {
                let was_active = saved.runner.status.is_active();
                self.runner = saved.runner;
                if was_active {
                    self.runner.reset_on_stop();
                }
                self.safety = saved.safety;
                self.budget = saved.budget;
                self.book = PositionBook::from_positions(saved.positions);
                info!(
                    "已恢复运行状态: {} 个策略, {} 个持仓, 总开关={}",
                    self.runner.strategy_ids.len(),
                    self.book.len(),
                    self.safety.kill_switch
                );
                Ok(RestoreOutcome::Restored { was_active })
            }
            Ok(None) => {
                info!("没有持久化状态，使用初始状态");
                Ok(RestoreOutcome::Fresh)
            }
            Err(AppError::CorruptedState(reason)) => {
                error!("持久化状态损坏，运行器进入 ERROR 并打开总开关: {}", reason);
                // 启动阶段没有可迁移的前序状态，直接置为 ERROR
                self.runner.status = RunnerStatus::Error;
                self.runner.error_reason = Some(format!("状态文件损坏: {}", reason));
                self.safety
                    .engage_kill_switch(format!("状态文件损坏: {}", reason), Utc::now());
                Ok(RestoreOutcome::Corrupted { reason })
            }
            Err(e) => Err(e),
        }
    }

    async fn active_strategies(&self) -> Result<Vec<StrategyConfig>, AppError> {
        Ok(self
            .strategy_repo
            .list()
            .await?
            .into_iter()
            .filter(StrategyConfig::is_active)
            .collect())
    }

    async fn call<T, F, Fut>(&self, label: &str, op: F) -> Result<T, AppError>
    where
        F: Fn(Arc<dyn Broker>) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let broker = self.executor.broker().clone();
        with_timeout_retry(&self.retry, label, || op(broker.clone())).await
    }

    // ---------- 命令 ----------

    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<RunnerStatus, RunnerCommandError> {
        match self.runner.status {
            RunnerStatus::Error => {
                let reason = self.runner.error_reason.clone().unwrap_or_default();
                return Err(RunnerCommandError::InErrorState(reason));
            }
            status if status.is_active() => return Ok(status),
            _ => {}
        }
        if self.safety.kill_switch {
            let reason = self.safety.kill_switch_reason.clone().unwrap_or_default();
            return Err(RunnerCommandError::KillSwitchEngaged(reason));
        }
        let active = self.active_strategies().await?;
        if active.is_empty() {
            return Err(RunnerCommandError::NoActiveStrategies);
        }

        self.runner.strategy_ids = active.iter().map(|c| c.id.clone()).collect();
        self.runner.started_at = Some(now);
        self.runner.error_reason = None;
        match self.clock.status_at(now).await {
            SessionState::Open { .. } => self.runner.transition(RunnerStatus::Running)?,
            closed => self.runner.enter_sleep(now, closed.next_open())?,
        }
        self.persist(now).await?;
        info!(
            "运行器已启动: 策略 {:?}, 状态 {}",
            self.runner.strategy_ids, self.runner.status
        );
        Ok(self.runner.status)
    }

    /// 停止不平仓
    pub async fn stop(&mut self, now: DateTime<Utc>) -> Result<(), RunnerCommandError> {
        if self.runner.status != RunnerStatus::Stopped {
            self.runner.reset_on_stop();
            info!("运行器已停止，持仓保留");
        }
        self.persist(now).await?;
        Ok(())
    }

    /// 紧急停止: 打开总开关、停止运行器、撤销在途入场单、对所有持仓提交平仓单
    ///
    /// 重复调用只会跳过已在平仓中的持仓。清仓不经过风控闸门。
    /// 撤单前已部分成交的入场单先记入持仓再一并清仓；撤单未确认的入场单
    /// 留在在途列表，之后成交时立即清仓。
    pub async fn panic_stop(&mut self, now: DateTime<Utc>) -> Result<PanicStopReport, RunnerCommandError> {
        let engaged = self.safety.engage_kill_switch("紧急停止", now);
        if self.runner.status != RunnerStatus::Stopped {
            self.runner.reset_on_stop();
        }

        let canceled_entries = self.cancel_pending_entries(now).await;
        let report = self.liquidate(now).await;
        if report.is_complete() {
            warn!(
                "紧急停止完成: 新提交 {} 笔平仓, {} 笔已在途",
                report.submitted.len(),
                report.already_pending.len()
            );
        } else {
            error!("紧急停止: {} 个持仓平仓失败 {:?}", report.failed.len(), report.failed);
        }
        self.persist(now).await?;
        Ok(PanicStopReport {
            kill_switch_engaged: engaged,
            canceled_entries,
            liquidation: report,
        })
    }

    async fn cancel_pending_entries(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.is_entry())
            .map(|(id, _)| id.clone())
            .collect();
        let mut canceled = Vec::new();
        for id in ids {
            if let Some(order) = self.pending.get_mut(&id) {
                order.liquidate_on_fill = true;
            }
            match self.executor.cancel_order(&id).await {
                Ok(ack) if ack.status.is_terminal() => {
                    if let Some(order) = self.pending.remove(&id) {
                        self.settle(&order, &ack, now);
                    }
                    canceled.push(id);
                }
                Ok(ack) => info!("入场单撤单待确认 {}: {:?}", id, ack.status),
                Err(e) => warn!("撤销入场单失败 {}: {}", id, e),
            }
        }
        canceled
    }

    /// 清仓并跟踪提交的平仓单
    async fn liquidate(&mut self, now: DateTime<Utc>) -> LiquidationReport {
        let report = self.executor.liquidate_all(&mut self.book).await;
        for (strategy_id, ack) in &report.submitted {
            let order = PendingOrder::exit(strategy_id, &ack.symbol, ExitReason::Liquidation);
            self.track(order, ack, now);
        }
        report
    }

    pub async fn set_kill_switch(
        &mut self,
        enabled: bool,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RunnerCommandError> {
        if enabled {
            let reason = reason.unwrap_or_else(|| "人工操作".to_string());
            if self.safety.engage_kill_switch(reason.clone(), now) {
                warn!("总开关已打开: {}", reason);
            }
        } else if self.safety.kill_switch {
            self.safety.release_kill_switch();
            info!("总开关已关闭");
        }
        self.persist(now).await?;
        Ok(())
    }

    pub async fn reset_consecutive_losses(
        &mut self,
        strategy_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RunnerCommandError> {
        let before = self.safety.consecutive_losses_for(strategy_id);
        self.safety.reset_consecutive_losses(strategy_id);
        info!("人工重置连续亏损计数: {} ({} -> 0)", strategy_id, before);
        self.persist(now).await?;
        Ok(())
    }

    /// 把回撤峰值重新锚定到当前权益
    pub async fn reset_drawdown_peak(&mut self, now: DateTime<Utc>) -> Result<(), RunnerCommandError> {
        self.safety.reset_drawdown_peak();
        info!("人工重置回撤峰值: {:?}", self.safety.peak_equity());
        self.persist(now).await?;
        Ok(())
    }

    pub async fn preflight(&self, symbol: &str) -> Preflight {
        let wanted = symbol.trim().to_uppercase();
        let strategies = match self.active_strategies().await {
            Ok(s) => s,
            Err(e) => return Preflight::blocked(&wanted, None, format!("读取策略失败: {}", e)),
        };
        let matched = strategies.iter().find_map(|c| {
            c.symbols
                .iter()
                .find(|s| s.eq_ignore_ascii_case(&wanted))
                .map(|s| (c, s.clone()))
        });
        let Some((config, symbol)) = matched else {
            return Preflight::blocked(&wanted, None, format!("没有启用的策略交易 {}", wanted));
        };
        let Some(account) = self.account.as_ref() else {
            return Preflight::blocked(&symbol, None, "尚未同步券商账户");
        };

        let params = &config.parameters;
        let position = self.book.get(&config.id, &symbol);
        if position.map_or(false, |p| p.pending_exit) {
            return Preflight::blocked(&symbol, None, "平仓单处理中");
        }
        let notional = size_tranche(params, account.equity);
        let proposal = EntryProposal {
            strategy: StrategyGate::new(&config.id, params),
            symbol: &symbol,
            notional,
            buying_power: account.buying_power,
            current_position_value: position.map_or(0.0, |p| {
                p.market_value(self.prices.get(&symbol).copied().unwrap_or(p.avg_entry_price))
            }),
            filled_tranches: position.map_or(0, |p| p.filled_tranches()),
            planned_tranches: position.map_or(params.dca_tranches, |p| p.planned_tranches),
            open_positions: self.book.len(),
            is_new_position: position.is_none(),
        };
        if let Decision::Rejected(rejection) = self.governor.check_entry(&self.safety, &proposal) {
            return Preflight::blocked(&symbol, Some(rejection.rule), rejection.reason);
        }
        if let Err(e) = self.budget_manager.can_spend(&self.budget, notional) {
            return Preflight::blocked(&symbol, None, e.to_string());
        }
        Preflight {
            reason: format!("策略 {} 可以下单，单笔 {:.2}", config.id, notional),
            symbol,
            allowed: true,
            rule: None,
        }
    }

    // ---------- tick ----------

    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if !self.runner.status.is_active() {
            // 停止后仍要跟踪在途订单，紧急停止的清仓单靠这里结算
            if !self.pending.is_empty() {
                if let Err(e) = self.reconcile_pending(now).await {
                    warn!("核对在途订单失败: {}", e);
                }
                if let Err(e) = self.persist(now).await {
                    warn!("保存运行状态失败: {}", e);
                }
            }
            return TickOutcome::Idle;
        }
        self.runner.tick_count += 1;
        self.runner.last_tick_at = Some(now);

        let outcome = match self.clock.status_at(now).await {
            SessionState::Open { session_date, .. } => self.open_tick(now, session_date).await,
            closed => self.sleep(now, closed.next_open()),
        };
        if let Err(e) = self.persist(now).await {
            warn!("保存运行状态失败: {}", e);
        }
        outcome
    }

    fn sleep(&mut self, now: DateTime<Utc>, next_open: Option<DateTime<Utc>>) -> TickOutcome {
        if self.runner.status == RunnerStatus::Running {
            info!("已收盘，运行器休眠，下次开盘 {:?}", next_open);
        }
        if let Err(e) = self.runner.enter_sleep(now, next_open) {
            warn!("进入休眠失败: {}", e);
        }
        TickOutcome::Sleeping { next_open }
    }

    fn halt(&mut self, reason: String) -> TickOutcome {
        error!("致命错误，运行器进入 ERROR: {}", reason);
        if let Err(e) = self.runner.fail(reason.clone()) {
            warn!("切换到 ERROR 失败: {}", e);
        }
        TickOutcome::Halted { reason }
    }

    async fn open_tick(&mut self, now: DateTime<Utc>, session_date: NaiveDate) -> TickOutcome {
        let catch_up = self.runner.status == RunnerStatus::Sleeping;
        if catch_up {
            if let Err(e) = self.runner.resume(now) {
                warn!("恢复运行失败: {}", e);
            }
            info!(
                "开盘恢复运行 (第 {} 次)，执行补偿评估",
                self.runner.resume_count
            );
        }
        if self.safety.roll_session(session_date) {
            info!("新交易日 {}，当日已实现亏损清零", session_date);
        }
        if let Some(week) = self.budget_manager.roll_over(&mut self.budget, session_date) {
            info!(
                "上周预算结算 {}: 使用 {:.2}/{:.2} ({:.1}%), 交易 {} 笔, 盈亏 {:.2}",
                week.week_start, week.used, week.budget, week.used_pct, week.trade_count, week.realized_pnl
            );
        }

        let account = match self.poll_broker(now).await {
            Ok(account) => account,
            Err(e) if e.is_fatal() => return self.halt(e.to_string()),
            Err(e) => {
                warn!("券商轮询失败，本次跳过评估: {}", e);
                self.runner.record_poll_failure(e.to_string(), now);
                return TickOutcome::PollFailed {
                    error: e.to_string(),
                };
            }
        };

        match self.evaluate_strategies(&account, now).await {
            Ok(orders) => TickOutcome::Evaluated { catch_up, orders },
            Err(e) => self.halt(e.to_string()),
        }
    }

    async fn poll_broker(&mut self, now: DateTime<Utc>) -> Result<AccountSnapshot, AppError> {
        self.call("券商连接检查", |b| async move { b.check_connectivity().await })
            .await?;
        let account = self
            .call("查询账户", |b| async move { b.account().await })
            .await?;
        let positions = self
            .call("查询持仓", |b| async move { b.positions().await })
            .await?;

        self.runner.record_poll_success(now);
        self.safety.last_broker_sync = Some(now);
        self.safety.mark_account_equity(account.equity);
        self.account = Some(account.clone());

        self.reconcile_pending(now).await?;
        self.reconcile_positions(&positions);
        Ok(account)
    }

    /// 在途订单进入终态后结算
    async fn reconcile_pending(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        let ids: Vec<String> = self.pending.keys().cloned().collect();
        let mut reliquidate = false;
        for id in ids {
            let ack = match self.executor.order_status(&id).await {
                Ok(ack) => ack,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("查询在途订单 {} 失败: {}", id, e);
                    continue;
                }
            };
            if !ack.status.is_terminal() {
                continue;
            }
            if let Some(order) = self.pending.remove(&id) {
                self.settle(&order, &ack, now);
                if order.liquidate_on_fill && ack.has_fill() {
                    warn!("紧急停止后入场单 {} 成交，立即清仓", id);
                    reliquidate = true;
                }
            }
        }
        if reliquidate {
            let report = self.liquidate(now).await;
            if !report.is_complete() {
                error!("补充清仓失败 {:?}", report.failed);
            }
        }
        Ok(())
    }

    /// 本地持仓与券商持仓按标的核对，不一致只告警，由人工处理
    fn reconcile_positions(&mut self, positions: &[BrokerPosition]) {
        for p in positions {
            if p.market_price > 0.0 {
                self.prices.insert(p.symbol.clone(), p.market_price);
            }
        }
        let symbols: Vec<String> = self.book.iter().map(|p| p.symbol.clone()).collect();
        for symbol in symbols {
            let local = self.book.symbol_quantity(&symbol);
            let remote = positions
                .iter()
                .filter(|p| p.symbol == symbol)
                .map(|p| p.quantity)
                .sum::<f64>();
            if (local - remote).abs() > 1e-6 {
                warn!(
                    "持仓不一致 {}: 本地 {:.6}, 券商 {:.6}",
                    symbol, local, remote
                );
            }
        }
    }

    async fn evaluate_strategies(
        &mut self,
        account: &AccountSnapshot,
        now: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let strategies: Vec<StrategyConfig> = match self.active_strategies().await {
            Ok(list) => list
                .into_iter()
                .filter(|c| self.runner.strategy_ids.contains(&c.id))
                .collect(),
            Err(e) => {
                warn!("读取策略配置失败，本次跳过评估: {}", e);
                return Ok(0);
            }
        };
        if let Decision::Rejected(rejection) = self.governor.check_global(&self.safety) {
            info!("风控拦截新开仓 [{}]: {}", rejection.rule.as_str(), rejection.reason);
        }

        let mut bars_cache: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        let mut orders = 0;
        for config in &strategies {
            let equity = config.parameters.position_size + self.safety.realized_pnl_for(&config.id);
            self.safety.mark_strategy_equity(&config.id, equity);

            for symbol in &config.symbols {
                let bars = match bars_cache.get(symbol) {
                    Some(bars) => bars.clone(),
                    None => {
                        let limit = bar_lookback();
                        let name = symbol.clone();
                        let fetched = self
                            .call("拉取日线", move |b| {
                                let name = name.clone();
                                async move { b.recent_bars(&name, limit).await }
                            })
                            .await;
                        match fetched {
                            Ok(bars) => {
                                bars_cache.insert(symbol.clone(), bars.clone());
                                bars
                            }
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => {
                                warn!("拉取 {} 日线失败: {}", symbol, e);
                                continue;
                            }
                        }
                    }
                };
                let Some(last) = bars.last().copied() else {
                    debug!("{} 没有日线数据", symbol);
                    continue;
                };
                self.prices.insert(symbol.clone(), last.close);

                if self.evaluate_exit_for(config, symbol, &bars, now).await? {
                    orders += 1;
                    continue;
                }
                if self.evaluate_entry_for(config, symbol, &bars, account, now).await? {
                    orders += 1;
                }
            }
        }
        Ok(orders)
    }

    /// 用最新一根 K 线判断出场
    ///
    /// 移动止损的最高价只取已走完的 K 线，同一根 K 线反复评估结果不变；
    /// 建仓所在的 K 线不做出场判断。
    async fn evaluate_exit_for(
        &mut self,
        config: &StrategyConfig,
        symbol: &str,
        bars: &[Bar],
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some((bar, completed)) = bars.split_last() else {
            return Ok(false);
        };
        let (signal, quantity) = match self.book.get_mut(&config.id, symbol) {
            Some(pos) if !pos.pending_exit => {
                if pos.last_bar_ts.is_none() {
                    if let Some(prev) = completed.last() {
                        pos.mark_bar_checked(prev.ts);
                    }
                }
                for done in completed {
                    if !pos.is_bar_checked(done.ts) {
                        pos.ratchet_high(done.high);
                        pos.mark_bar_checked(done.ts);
                    }
                }
                if pos.is_bar_checked(bar.ts) {
                    return Ok(false);
                }
                (evaluate_exit(&config.parameters, pos, bar), pos.quantity)
            }
            _ => return Ok(false),
        };
        let Some(signal) = signal else {
            return Ok(false);
        };
        if let Decision::Rejected(rejection) = self.governor.check_exit(&self.safety) {
            info!(
                "平仓信号被拦截 {} {} [{}]: {}",
                config.id,
                symbol,
                rejection.rule.as_str(),
                rejection.reason
            );
            return Ok(false);
        }

        info!(
            "触发平仓 {} {}: {} 参考价 {:.4}",
            config.id,
            symbol,
            signal.reason.as_str(),
            signal.price
        );
        let intent = OrderIntent::Exit {
            reason: signal.reason,
        };
        let order = OrderRequest::market(&config.id, symbol, OrderSide::Sell, quantity, intent);
        let pending = PendingOrder::exit(&config.id, symbol, signal.reason);
        self.submit(order, pending, now).await
    }

    async fn evaluate_entry_for(
        &mut self,
        config: &StrategyConfig,
        symbol: &str,
        bars: &[Bar],
        account: &AccountSnapshot,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        if self
            .pending
            .values()
            .any(|p| p.strategy_id == config.id && p.symbol == symbol)
        {
            debug!("{} {} 有在途订单，跳过入场评估", config.id, symbol);
            return Ok(false);
        }

        let params = &config.parameters;
        let position = self.book.get(&config.id, symbol);
        let signal = match evaluate_entry(params, bars, position, account.equity) {
            EntryDecision::Enter(signal) => signal,
            EntryDecision::Skip(reason) => {
                debug!("{} {} 不入场: {}", config.id, symbol, reason);
                return Ok(false);
            }
        };
        if signal.reference_price <= 0.0 {
            return Ok(false);
        }

        let planned_tranches = position.map_or(params.dca_tranches, |p| p.planned_tranches);
        let proposal = EntryProposal {
            strategy: StrategyGate::new(&config.id, params),
            symbol,
            notional: signal.notional,
            buying_power: account.buying_power,
            current_position_value: position.map_or(0.0, |p| p.market_value(signal.reference_price)),
            filled_tranches: position.map_or(0, |p| p.filled_tranches()),
            planned_tranches,
            open_positions: self.book.len(),
            is_new_position: position.is_none(),
        };
        if let Decision::Rejected(rejection) = self.governor.check_entry(&self.safety, &proposal) {
            info!(
                "入场被风控拦截 {} {} [{}]: {}",
                config.id,
                symbol,
                rejection.rule.as_str(),
                rejection.reason
            );
            return Ok(false);
        }
        if let Err(e) = self.budget_manager.can_spend(&self.budget, signal.notional) {
            info!("入场被预算拦截 {} {}: {}", config.id, symbol, e);
            return Ok(false);
        }

        info!(
            "触发第 {}/{} 笔入场 {} {}: 金额 {:.2} 参考价 {:.4}",
            signal.tranche + 1,
            planned_tranches,
            config.id,
            symbol,
            signal.notional,
            signal.reference_price
        );
        let intent = OrderIntent::Entry {
            tranche: signal.tranche,
        };
        let quantity = signal.notional / signal.reference_price;
        let order = OrderRequest::market(&config.id, symbol, OrderSide::Buy, quantity, intent);
        let pending = PendingOrder {
            strategy_id: config.id.clone(),
            symbol: symbol.to_string(),
            intent,
            planned_tranches,
            entry_atr: signal.atr,
            bar_ts: bars.last().map(|b| b.ts),
            liquidate_on_fill: false,
        };
        self.submit(order, pending, now).await
    }

    /// 提交订单。瞬时错误 (含限流) 只告警，下一个 tick 重新评估
    async fn submit(
        &mut self,
        order: OrderRequest,
        pending: PendingOrder,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        match self.executor.submit(&order).await {
            Ok(ack) => {
                if matches!(pending.intent, OrderIntent::Exit { .. }) {
                    if let Some(pos) = self.book.get_mut(&pending.strategy_id, &pending.symbol) {
                        pos.pending_exit = true;
                    }
                }
                self.track(pending, &ack, now);
                Ok(true)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("下单失败 {} {}: {}", order.strategy_id, order.symbol, e);
                Ok(false)
            }
        }
    }

    fn track(&mut self, pending: PendingOrder, ack: &OrderAck, now: DateTime<Utc>) {
        if ack.status.is_terminal() {
            self.settle(&pending, ack, now);
        } else {
            self.pending.insert(ack.client_order_id.clone(), pending);
        }
    }

    /// 终态订单写入持仓簿、预算与安全状态
    ///
    /// 按实际成交数量结算，撤单或过期前的部分成交同样入账。
    fn settle(&mut self, order: &PendingOrder, ack: &OrderAck, now: DateTime<Utc>) {
        if !ack.has_fill() {
            warn!(
                "订单未成交 {} {} {}: {:?}",
                ack.client_order_id, order.strategy_id, order.symbol, ack.status
            );
            self.clear_pending_exit(order);
            return;
        }
        if !ack.is_filled() {
            warn!(
                "订单部分成交 {} {} {}: {:?} qty={:.6}",
                ack.client_order_id, order.strategy_id, order.symbol, ack.status, ack.filled_quantity
            );
        }
        let Some(price) = ack
            .avg_fill_price
            .or_else(|| self.prices.get(&order.symbol).copied())
        else {
            warn!("订单 {} 已成交但没有成交价，等待人工核对", ack.client_order_id);
            return;
        };

        match order.intent {
            OrderIntent::Entry { tranche } => {
                let fill = TrancheFill {
                    index: tranche,
                    quantity: ack.filled_quantity,
                    price,
                    fee: 0.0,
                    filled_at: now,
                };
                let notional = fill.notional();
                if let Err(e) = self.book.apply_entry_fill(
                    &order.strategy_id,
                    &order.symbol,
                    order.planned_tranches,
                    fill,
                    order.entry_atr,
                ) {
                    error!("成交无法写入持仓 {} {}: {}", order.strategy_id, order.symbol, e);
                    return;
                }
                if let Some(pos) = self.book.get_mut(&order.strategy_id, &order.symbol) {
                    if let Some(ts) = order.bar_ts {
                        pos.mark_bar_checked(ts);
                    }
                    info!(
                        "建仓成交 {} {} 第 {}/{} 笔: qty={:.6} @ {:.4}, 均价 {:.4}",
                        order.strategy_id,
                        order.symbol,
                        tranche + 1,
                        pos.planned_tranches,
                        ack.filled_quantity,
                        price,
                        pos.avg_entry_price
                    );
                }
                self.budget_manager.record_spend(&mut self.budget, notional);
            }
            OrderIntent::Exit { reason } => {
                let settled = match self.book.settle_exit(
                    &order.strategy_id,
                    &order.symbol,
                    ack.filled_quantity,
                    price,
                    0.0,
                ) {
                    Ok(Some(settled)) => settled,
                    Ok(None) => {
                        warn!("平仓成交但本地没有持仓 {} {}", order.strategy_id, order.symbol);
                        return;
                    }
                    Err(e) => {
                        error!("平仓成交无法入账 {} {}: {}", order.strategy_id, order.symbol, e);
                        return;
                    }
                };
                self.safety.record_realized(&order.strategy_id, settled.pnl);
                self.budget_manager.record_realized(&mut self.budget, settled.pnl);
                match settled.trade_pnl {
                    Some(trade_pnl) => {
                        self.safety.record_trade_outcome(&order.strategy_id, trade_pnl);
                        info!(
                            "平仓成交 {} {} ({}): qty={:.6} @ {:.4}, 盈亏 {:.2}, 连续亏损 {}",
                            order.strategy_id,
                            order.symbol,
                            reason.as_str(),
                            settled.quantity,
                            price,
                            trade_pnl,
                            self.safety.consecutive_losses_for(&order.strategy_id)
                        );
                    }
                    None => {
                        // 剩余数量留待下次出场判断
                        self.clear_pending_exit(order);
                        info!(
                            "部分平仓 {} {} ({}): qty={:.6} @ {:.4}, 本次盈亏 {:.2}",
                            order.strategy_id,
                            order.symbol,
                            reason.as_str(),
                            settled.quantity,
                            price,
                            settled.pnl
                        );
                    }
                }
            }
        }
    }

    fn clear_pending_exit(&mut self, order: &PendingOrder) {
        if matches!(order.intent, OrderIntent::Exit { .. }) {
            if let Some(pos) = self.book.get_mut(&order.strategy_id, &order.symbol) {
                pos.pending_exit = false;
            }
        }
    }
}
