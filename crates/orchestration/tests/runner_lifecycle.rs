//! 运行器生命周期: 模拟盘券商 + 内存仓储

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use dip_quant_common::utils::date_to_ms;
use dip_quant_common::Bar;
use dip_quant_domain::{
    BudgetSettings, Percentage, RiskLimits, RunnerStatus, StrategyConfig, StrategyParameters,
};
use dip_quant_execution::RetryPolicy;
use dip_quant_infrastructure::{
    MemoryStateRepository, MemoryStrategyConfigRepository, PaperBroker, PaperFault,
};
use dip_quant_market::{MarketClock, WeekdayCalendar};
use dip_quant_orchestration::{
    RestoreOutcome, RunnerCommandError, RunnerDeps, RunnerManager, RunnerOptions, TickOutcome,
};
use dip_quant_risk::GateRule;
use float_cmp::approx_eq;

/// 2024-01-03 周三 10:00 EST
fn wed_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 15, 0, 0).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn bar(date: NaiveDate, close: f64) -> Bar {
    Bar::new(date_to_ms(date), close, close * 1.005, close * 0.995, close, 1_000_000.0)
}

/// 震荡 120 天后最后一天跌到 94，满足买跌条件
fn dip_bars(last: NaiveDate) -> Vec<Bar> {
    let n = 120;
    (0..n)
        .map(|i| {
            let date = last - chrono::Duration::days((n - 1 - i) as i64);
            let close = if i == n - 1 {
                94.0
            } else {
                100.0 * (1.0 + 0.02 * (i as f64 * std::f64::consts::TAU / 10.0).sin())
            };
            bar(date, close)
        })
        .collect()
}

fn strategy() -> StrategyConfig {
    StrategyConfig::new("dip-spy", vec!["SPY".into()], StrategyParameters::default())
}

fn options() -> RunnerOptions {
    RunnerOptions {
        tick_interval_secs: 60,
        risk: RiskLimits {
            daily_loss_limit: 500.0,
            max_position_size: 10_000.0,
            account_max_drawdown: Percentage::new(15.0).unwrap(),
            drawdown_scope: dip_quant_domain::DrawdownScope::Strategy,
            max_open_positions: None,
        },
        budget: BudgetSettings {
            weekly_budget: 5_000.0,
            ..BudgetSettings::default()
        },
        retry: RetryPolicy::no_retry(Duration::from_secs(1)),
        throttle_per_minute: 30,
    }
}

struct Harness {
    broker: Arc<PaperBroker>,
    state: Arc<MemoryStateRepository>,
    manager: RunnerManager,
}

async fn harness_with(configs: Vec<StrategyConfig>, state: MemoryStateRepository) -> Harness {
    let broker = Arc::new(PaperBroker::new(10_000.0));
    broker.set_bars("SPY", dip_bars(day(2024, 1, 3))).await;
    let state = Arc::new(state);
    let deps = RunnerDeps {
        broker: broker.clone(),
        clock: MarketClock::new(
            Arc::new(WeekdayCalendar::nyse()),
            chrono_tz::America::New_York,
        ),
        state_repo: state.clone(),
        strategy_repo: Arc::new(MemoryStrategyConfigRepository::new(configs)),
    };
    let manager = RunnerManager::new(deps, options()).unwrap();
    Harness {
        broker,
        state,
        manager,
    }
}

async fn harness() -> Harness {
    harness_with(vec![strategy()], MemoryStateRepository::new()).await
}

#[tokio::test]
async fn test_start_requires_active_strategy() {
    let mut disabled = strategy();
    disabled.enabled = false;
    let h = harness_with(vec![disabled], MemoryStateRepository::new()).await;
    let err = h.manager.start_at(wed_open()).await.unwrap_err();
    assert!(matches!(err, RunnerCommandError::NoActiveStrategies));
    assert_eq!(h.manager.runner_snapshot().await.status, RunnerStatus::Stopped);
}

#[tokio::test]
async fn test_start_rejected_while_kill_switch_engaged() {
    let h = harness().await;
    h.manager
        .set_kill_switch(true, Some("盘前检查".into()))
        .await
        .unwrap();
    let err = h.manager.start_at(wed_open()).await.unwrap_err();
    assert!(matches!(err, RunnerCommandError::KillSwitchEngaged(_)));

    h.manager.set_kill_switch(false, None).await.unwrap();
    assert_eq!(
        h.manager.start_at(wed_open()).await.unwrap(),
        RunnerStatus::Running
    );
}

#[tokio::test]
async fn test_start_outside_session_sleeps() {
    let h = harness().await;
    // 周六
    let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 15, 0, 0).unwrap();
    assert_eq!(
        h.manager.start_at(saturday).await.unwrap(),
        RunnerStatus::Sleeping
    );
    let snapshot = h.manager.runner_snapshot().await;
    assert_eq!(snapshot.sleep_since, Some(saturday));
    assert_eq!(
        snapshot.next_market_open_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 8, 14, 30, 0).unwrap())
    );
}

#[tokio::test]
async fn test_entry_sleep_and_catch_up_resume() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();

    let outcome = h.manager.tick_at(wed_open()).await;
    assert_eq!(
        outcome,
        TickOutcome::Evaluated {
            catch_up: false,
            orders: 1
        }
    );
    {
        let core = h.manager.core().lock().await;
        let pos = core.book().get("dip-spy", "SPY").expect("position opened");
        assert!(approx_eq!(f64, pos.avg_entry_price, 94.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, core.budget().used, 1_000.0, epsilon = 1e-6));
    }

    // 同一根K线不会追加
    let again = h.manager.tick_at(wed_open() + chrono::Duration::minutes(1)).await;
    assert_eq!(
        again,
        TickOutcome::Evaluated {
            catch_up: false,
            orders: 0
        }
    );

    let friday_night = Utc.with_ymd_and_hms(2024, 1, 5, 23, 0, 0).unwrap();
    assert!(matches!(
        h.manager.tick_at(friday_night).await,
        TickOutcome::Sleeping { .. }
    ));
    let snapshot = h.manager.runner_snapshot().await;
    assert_eq!(snapshot.status, RunnerStatus::Sleeping);
    assert_eq!(snapshot.sleep_since, Some(friday_night));

    let monday_open = Utc.with_ymd_and_hms(2024, 1, 8, 14, 31, 0).unwrap();
    let resumed = h.manager.tick_at(monday_open).await;
    assert!(matches!(
        resumed,
        TickOutcome::Evaluated { catch_up: true, .. }
    ));
    let snapshot = h.manager.runner_snapshot().await;
    assert_eq!(snapshot.status, RunnerStatus::Running);
    assert_eq!(snapshot.resume_count, 1);
    assert_eq!(snapshot.last_resume_at, Some(monday_open));
    assert!(snapshot.sleep_since.is_none());
}

#[tokio::test]
async fn test_stop_loss_exit_records_loss() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.manager.tick_at(wed_open()).await;

    // 次日跌穿止损 (94 * 0.98 = 92.12)
    h.broker.push_bar("SPY", bar(day(2024, 1, 4), 90.0)).await;
    let thursday = Utc.with_ymd_and_hms(2024, 1, 4, 15, 0, 0).unwrap();
    let outcome = h.manager.tick_at(thursday).await;
    assert!(matches!(outcome, TickOutcome::Evaluated { orders: 1, .. }));

    let core = h.manager.core().lock().await;
    assert!(core.book().is_empty());
    let status = core.safety_status();
    assert_eq!(status.consecutive_losses.get("dip-spy"), Some(&1));
    let expected_loss = (94.0 - 90.0) * (1_000.0 / 94.0);
    assert!(approx_eq!(f64, status.realized_loss_today, expected_loss, epsilon = 1e-6));
}

#[tokio::test]
async fn test_panic_stop_is_idempotent() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.manager.tick_at(wed_open()).await;

    let first = h.manager.panic_stop().await.unwrap();
    assert!(first.kill_switch_engaged);
    assert_eq!(first.liquidation.submitted.len(), 1);

    let second = h.manager.panic_stop().await.unwrap();
    assert!(!second.kill_switch_engaged);
    assert!(second.liquidation.submitted.is_empty());

    let snapshot = h.manager.runner_snapshot().await;
    assert_eq!(snapshot.status, RunnerStatus::Stopped);
    assert!(h.manager.safety_status().await.kill_switch);
    assert!(h.manager.core().lock().await.book().is_empty());
    // 一笔建仓 + 一笔清仓
    assert_eq!(h.broker.submitted_orders().await.len(), 2);

    // 总开关打开时不再下单
    assert_eq!(h.manager.tick_at(wed_open()).await, TickOutcome::Idle);
}

#[tokio::test]
async fn test_transient_poll_failure_keeps_running() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.broker
        .set_fault(Some(PaperFault::Transient("timeout".into())))
        .await;

    let outcome = h.manager.tick_at(wed_open()).await;
    assert!(matches!(outcome, TickOutcome::PollFailed { .. }));
    let snapshot = h.manager.runner_snapshot().await;
    assert_eq!(snapshot.status, RunnerStatus::Running);
    assert_eq!(snapshot.poll_error_count, 1);
    assert!(!snapshot.broker_connected);
    assert!(snapshot.last_poll_error.is_some());

    h.broker.set_fault(None).await;
    assert!(matches!(
        h.manager.tick_at(wed_open()).await,
        TickOutcome::Evaluated { .. }
    ));
    assert!(h.manager.runner_snapshot().await.broker_connected);
}

#[tokio::test]
async fn test_auth_failure_moves_to_error_until_stopped() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.broker.set_fault(Some(PaperFault::Auth("401".into()))).await;

    assert!(matches!(
        h.manager.tick_at(wed_open()).await,
        TickOutcome::Halted { .. }
    ));
    assert_eq!(h.manager.runner_snapshot().await.status, RunnerStatus::Error);
    assert!(matches!(
        h.manager.start_at(wed_open()).await,
        Err(RunnerCommandError::InErrorState(_))
    ));

    h.broker.set_fault(None).await;
    h.manager.stop().await.unwrap();
    assert_eq!(
        h.manager.start_at(wed_open()).await.unwrap(),
        RunnerStatus::Running
    );
}

#[tokio::test]
async fn test_corrupted_state_enters_error_with_kill_switch() {
    let h = harness_with(vec![strategy()], MemoryStateRepository::corrupted()).await;
    let outcome = h.manager.restore().await.unwrap();
    assert!(matches!(outcome, RestoreOutcome::Corrupted { .. }));
    assert_eq!(h.manager.runner_snapshot().await.status, RunnerStatus::Error);
    assert!(h.manager.safety_status().await.kill_switch);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.manager.tick_at(wed_open()).await;
    h.manager
        .set_kill_switch(true, Some("收盘检查".into()))
        .await
        .unwrap();

    let saved = h.state.snapshot().await.expect("state saved");
    let restarted = harness_with(vec![strategy()], MemoryStateRepository::with_state(saved)).await;
    assert_eq!(
        restarted.manager.restore().await.unwrap(),
        RestoreOutcome::Restored { was_active: true }
    );

    let snapshot = restarted.manager.runner_snapshot().await;
    assert_eq!(snapshot.status, RunnerStatus::Stopped);
    assert_eq!(snapshot.strategy_ids, vec!["dip-spy".to_string()]);
    assert_eq!(snapshot.tick_interval_secs, 60);

    let safety = restarted.manager.safety_status().await;
    assert!(safety.kill_switch);
    assert_eq!(safety.peak_equity, Some(10_000.0));
    let core = restarted.manager.core().lock().await;
    assert!(approx_eq!(f64, core.budget().used, 1_000.0, epsilon = 1e-6));
    assert_eq!(core.book().len(), 1);
}

#[tokio::test]
async fn test_preflight_explains_block() {
    let h = harness().await;
    let before = h.manager.preflight("SPY").await;
    assert!(!before.allowed);
    assert!(before.rule.is_none());

    let unknown = h.manager.preflight("QQQ").await;
    assert!(!unknown.allowed);

    h.manager.start_at(wed_open()).await.unwrap();
    h.manager.tick_at(wed_open()).await;
    // 单笔策略已满仓
    let full = h.manager.preflight("spy").await;
    assert!(!full.allowed);
    assert_eq!(full.rule, Some(GateRule::MaxTranches));

    h.manager.set_kill_switch(true, None).await.unwrap();
    let blocked = h.manager.preflight("SPY").await;
    assert_eq!(blocked.rule, Some(GateRule::KillSwitch));
    assert!(!blocked.reason.is_empty());
}

#[tokio::test]
async fn test_stop_keeps_positions() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.manager.tick_at(wed_open()).await;
    h.manager.stop().await.unwrap();

    assert_eq!(h.manager.runner_snapshot().await.status, RunnerStatus::Stopped);
    assert_eq!(h.manager.core().lock().await.book().len(), 1);
    assert_eq!(h.manager.tick_at(wed_open()).await, TickOutcome::Idle);
}

#[tokio::test]
async fn test_repeated_ticks_on_entry_bar_do_not_exit() {
    let h = harness().await;
    // 建仓当天振幅很大: 最高 97，最低 93.5，收盘 94
    let mut bars = dip_bars(day(2024, 1, 3));
    if let Some(last) = bars.last_mut() {
        *last = Bar::new(last.ts, 94.0, 97.0, 93.5, 94.0, 1_000_000.0);
    }
    h.broker.set_bars("SPY", bars).await;
    h.manager.start_at(wed_open()).await.unwrap();

    assert!(matches!(
        h.manager.tick_at(wed_open()).await,
        TickOutcome::Evaluated { orders: 1, .. }
    ));
    for minutes in 1..=3 {
        let outcome = h.manager.tick_at(wed_open() + chrono::Duration::minutes(minutes)).await;
        assert!(matches!(outcome, TickOutcome::Evaluated { orders: 0, .. }));
    }
    assert_eq!(h.broker.submitted_orders().await.len(), 1);
    {
        let core = h.manager.core().lock().await;
        let pos = core.book().get("dip-spy", "SPY").expect("position kept");
        assert_eq!(pos.highest_price, 94.0);
    }

    // 次日不触发，同一根K线多次评估结果一致
    let thursday = Utc.with_ymd_and_hms(2024, 1, 4, 15, 0, 0).unwrap();
    h.broker
        .push_bar("SPY", Bar::new(date_to_ms(day(2024, 1, 4)), 94.5, 96.0, 94.5, 95.0, 1_000_000.0))
        .await;
    for minutes in 0..2 {
        let outcome = h.manager.tick_at(thursday + chrono::Duration::minutes(minutes)).await;
        assert!(matches!(outcome, TickOutcome::Evaluated { orders: 0, .. }));
    }

    // 周四最高 96 计入移动止损: 96 * 0.975 = 93.6
    let friday = Utc.with_ymd_and_hms(2024, 1, 5, 15, 0, 0).unwrap();
    h.broker
        .push_bar("SPY", Bar::new(date_to_ms(day(2024, 1, 5)), 94.0, 94.2, 93.4, 93.5, 1_000_000.0))
        .await;
    assert!(matches!(
        h.manager.tick_at(friday).await,
        TickOutcome::Evaluated { orders: 1, .. }
    ));
    assert!(h.manager.core().lock().await.book().is_empty());
    assert_eq!(h.broker.submitted_orders().await.len(), 2);
}

#[tokio::test]
async fn test_partial_exit_fill_reduces_position() {
    let h = harness().await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.manager.tick_at(wed_open()).await;
    let qty = 1_000.0 / 94.0;

    h.broker.set_hold_orders(true).await;
    h.broker.push_bar("SPY", bar(day(2024, 1, 4), 90.0)).await;
    let thursday = Utc.with_ymd_and_hms(2024, 1, 4, 15, 0, 0).unwrap();
    assert!(matches!(
        h.manager.tick_at(thursday).await,
        TickOutcome::Evaluated { orders: 1, .. }
    ));

    // 券商只成交一半，剩余撤单
    assert_eq!(h.broker.release_held(0.5).await, 1);
    let outcome = h.manager.tick_at(thursday + chrono::Duration::minutes(1)).await;
    // 剩余数量重新提交平仓
    assert!(matches!(outcome, TickOutcome::Evaluated { orders: 1, .. }));
    {
        let core = h.manager.core().lock().await;
        let pos = core.book().get("dip-spy", "SPY").expect("remainder kept");
        assert!(approx_eq!(f64, pos.quantity, qty / 2.0, epsilon = 1e-9));
        assert!(pos.pending_exit);
        let status = core.safety_status();
        assert_eq!(status.consecutive_losses.get("dip-spy").copied().unwrap_or(0), 0);
        assert!(approx_eq!(f64, status.realized_loss_today, 4.0 * qty / 2.0, epsilon = 1e-6));
    }

    h.broker.release_held(1.0).await;
    h.manager.tick_at(thursday + chrono::Duration::minutes(2)).await;
    let core = h.manager.core().lock().await;
    assert!(core.book().get("dip-spy", "SPY").is_none());
    let status = core.safety_status();
    assert_eq!(status.consecutive_losses.get("dip-spy"), Some(&1));
    assert!(approx_eq!(f64, status.realized_loss_today, 4.0 * qty, epsilon = 1e-6));
}

#[tokio::test]
async fn test_panic_stop_cancels_pending_entry() {
    let h = harness().await;
    h.broker.set_hold_orders(true).await;
    h.manager.start_at(wed_open()).await.unwrap();
    assert!(matches!(
        h.manager.tick_at(wed_open()).await,
        TickOutcome::Evaluated { orders: 1, .. }
    ));
    assert_eq!(h.manager.core().lock().await.pending_orders(), 1);

    let report = h.manager.panic_stop().await.unwrap();
    assert_eq!(report.canceled_entries.len(), 1);
    assert!(report.liquidation.submitted.is_empty());

    // 撤单之后券商不会再成交
    assert_eq!(h.broker.release_held(1.0).await, 0);
    assert_eq!(h.manager.tick_at(wed_open()).await, TickOutcome::Idle);
    let core = h.manager.core().lock().await;
    assert!(core.book().is_empty());
    assert_eq!(core.pending_orders(), 0);
    assert!(core.safety_status().kill_switch);
    assert_eq!(h.broker.cash().await, 10_000.0);
}

#[tokio::test]
async fn test_panic_stop_liquidates_entry_filled_before_cancel() {
    let h = harness().await;
    h.broker.set_hold_orders(true).await;
    h.manager.start_at(wed_open()).await.unwrap();
    h.manager.tick_at(wed_open()).await;

    // 撤单前券商已成交一半
    h.broker.release_held(0.5).await;
    let report = h.manager.panic_stop().await.unwrap();
    assert_eq!(report.canceled_entries.len(), 1);
    assert_eq!(report.liquidation.submitted.len(), 1);
    {
        let core = h.manager.core().lock().await;
        let pos = core.book().get("dip-spy", "SPY").expect("partial entry booked");
        assert!(approx_eq!(f64, pos.quantity, 1_000.0 / 94.0 / 2.0, epsilon = 1e-9));
        assert!(pos.pending_exit);
    }

    // 停止状态下的 tick 仍会结算清仓单
    h.broker.release_held(1.0).await;
    assert_eq!(h.manager.tick_at(wed_open()).await, TickOutcome::Idle);
    let core = h.manager.core().lock().await;
    assert!(core.book().is_empty());
    assert_eq!(core.pending_orders(), 0);
    assert!(core.safety_status().kill_switch);
    assert!(approx_eq!(f64, h.broker.cash().await, 10_000.0, epsilon = 1e-6));
}
