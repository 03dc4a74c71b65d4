use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{NaiveDate, Utc};
use dip_quant_core::config::shutdown_manager::init_shutdown_manager;
use dip_quant_core::{AppConfig, ShutdownManager};
use dip_quant_domain::{
    BarSource, JobProgress, JobStatus, OptimizationRequest, RiskProfile, StrategyConfig,
    StrategyConfigRepository, StrategyParameters,
};
use dip_quant_orchestration::{
    OptimizationJobManager, RestoreOutcome, RunnerManager, TaskScheduler,
};
use dip_quant_strategies::BacktestEngine;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use super::bootstrap::{
    backtest_config, bar_source, build_runner_deps, runner_options, strategy_repository,
};
use crate::OptimizeArgs;

/// 组装运行器并恢复持久化状态
async fn restored_manager(config: &AppConfig) -> Result<(RunnerManager, RestoreOutcome)> {
    let deps = build_runner_deps(config).await?;
    let manager = RunnerManager::new(deps, runner_options(config))?;
    let outcome = manager.restore().await?;
    match &outcome {
        RestoreOutcome::Fresh => info!("首次启动，没有历史状态"),
        RestoreOutcome::Restored { was_active } => {
            info!("已恢复历史状态，上次运行中: {}", was_active)
        }
        RestoreOutcome::Corrupted { reason } => {
            error!("状态文件损坏，需人工处理后 stop 再 start: {}", reason)
        }
    }
    Ok((manager, outcome))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_runner(config: &AppConfig, start_now: bool) -> Result<()> {
    let (manager, outcome) = restored_manager(config).await?;
    let manager = Arc::new(manager);

    let resume = matches!(outcome, RestoreOutcome::Restored { was_active: true })
        && config.runner.resume_on_boot;
    if start_now || resume {
        match manager.start().await {
            Ok(status) => info!("运行器启动: {}", status),
            Err(e) => warn!("运行器未启动: {}", e),
        }
    }

    let handle = Arc::new(Mutex::new(Some(manager.spawn_loop().await)));
    let shutdown: &'static ShutdownManager = init_shutdown_manager(None);

    let loop_manager = manager.clone();
    let loop_handle = handle.clone();
    shutdown
        .register_shutdown_hook("runner_loop", move || {
            let manager = loop_manager.clone();
            let handle = loop_handle.clone();
            async move {
                manager.shutdown();
                if let Some(h) = handle.lock().await.take() {
                    h.await?;
                }
                Ok(())
            }
        })
        .await;

    let persist_manager = manager.clone();
    shutdown
        .register_shutdown_hook("persist_state", move || {
            let manager = persist_manager.clone();
            async move {
                manager.core().lock().await.persist(Utc::now()).await?;
                Ok(())
            }
        })
        .await;

    let signal = ShutdownManager::wait_for_shutdown_signal().await?;
    info!("收到 {}，开始关闭", signal);
    shutdown.shutdown().await
}

pub async fn run_backtest(
    config: &AppConfig,
    strategy_id: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let strategy = strategy_repository(config)
        .get(strategy_id)
        .await?
        .ok_or_else(|| anyhow!("策略不存在: {}", strategy_id))?;
    let source = bar_source(config);
    let mut series = BTreeMap::new();
    for symbol in &strategy.symbols {
        let bars = source.load_bars(symbol, None, end).await?;
        if bars.is_empty() {
            warn!("{} 没有历史数据，跳过", symbol);
            continue;
        }
        series.insert(symbol.clone(), bars);
    }
    if series.is_empty() {
        bail!("策略 {} 没有可用的历史数据", strategy_id);
    }

    let engine = BacktestEngine::new(backtest_config(config));
    let report = engine.run_from(&strategy.parameters, &series, start);
    info!(
        "回测完成 {}: 收益 {:.2}%, 交易 {} 笔, 胜率 {:.1}%, 最大回撤 {:.2}%, Sharpe {:.2}",
        strategy_id,
        report.total_return_pct,
        report.total_trades,
        report.win_rate_pct,
        report.max_drawdown_pct,
        report.sharpe
    );
    print_json(&report)
}

pub async fn run_optimize(config: &AppConfig, args: OptimizeArgs) -> Result<()> {
    let jobs = OptimizationJobManager::new(
        strategy_repository(config),
        bar_source(config),
        backtest_config(config),
        config.optimizer.stale_secs,
    );

    let mut scheduler = TaskScheduler::new();
    let reaper = jobs.clone();
    scheduler.add_periodic_task(
        "optimizer_reaper",
        config.optimizer.reaper_interval_secs * 1000,
        move || {
            let reaper = reaper.clone();
            async move {
                let reaped = reaper.reap_stale(Utc::now());
                if !reaped.is_empty() {
                    warn!("回收失效的优化任务: {:?}", reaped);
                }
            }
        },
    )?;

    let request = OptimizationRequest {
        method: args.method,
        objective: args.objective,
        iterations: args.iterations,
        ensemble: args.ensemble,
        scenarios: args.scenarios,
        walk_forward_folds: args.folds,
        min_trades: args.min_trades,
        strict_min_trades: args.strict_min_trades,
        start: args.start,
        end: args.end,
        seed: args.seed,
        apply_when_validated: args.apply,
        ..OptimizationRequest::new(args.strategy)
    };
    let id = jobs.submit(request).await?;

    let mut ticker = interval(Duration::from_millis(500));
    let mut last = JobProgress::default();
    let job = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(job) = jobs.poll(&id) else {
                    bail!("优化任务丢失: {}", id);
                };
                if job.status.is_terminal() {
                    break job;
                }
                if job.progress != last {
                    last = job.progress;
                    info!(
                        "优化进度 {}/{}, 当前最优得分 {:.3}",
                        last.completed,
                        last.total,
                        job.best.as_ref().map_or(f64::NAN, |b| b.score)
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("收到中断，取消优化任务 {}", id);
                if let Err(e) = jobs.cancel(&id) {
                    warn!("取消失败: {}", e);
                }
            }
        }
    };
    scheduler.shutdown().await;

    print_json(&job)?;
    match job.status {
        JobStatus::Failed(reason) => bail!("优化任务失败: {}", reason),
        status => {
            info!(
                "优化任务 {} 结束: {:?}, 验证={}, 已写回={}",
                id, status, job.validated, job.applied
            );
            Ok(())
        }
    }
}

pub async fn show_status(config: &AppConfig) -> Result<()> {
    let (manager, _) = restored_manager(config).await?;
    print_json(&json!({
        "runner": manager.runner_snapshot().await,
        "safety": manager.safety_status().await,
    }))
}

pub async fn set_kill_switch(config: &AppConfig, enabled: bool, reason: Option<String>) -> Result<()> {
    let (manager, _) = restored_manager(config).await?;
    manager.set_kill_switch(enabled, reason).await?;
    print_json(&manager.safety_status().await)
}

pub async fn panic_stop(config: &AppConfig) -> Result<()> {
    let (manager, _) = restored_manager(config).await?;
    let report = manager.panic_stop().await?;
    print_json(&report)?;
    if !report.liquidation.failed.is_empty() {
        bail!("{} 个持仓平仓失败，请人工处理", report.liquidation.failed.len());
    }
    Ok(())
}

pub async fn reset_losses(config: &AppConfig, strategy_id: &str) -> Result<()> {
    let (manager, _) = restored_manager(config).await?;
    manager.reset_consecutive_losses(strategy_id).await?;
    print_json(&manager.safety_status().await)
}

pub async fn reset_peak(config: &AppConfig) -> Result<()> {
    let (manager, _) = restored_manager(config).await?;
    manager.reset_drawdown_peak().await?;
    print_json(&manager.safety_status().await)
}

pub async fn preflight(config: &AppConfig, symbol: &str) -> Result<()> {
    let (manager, _) = restored_manager(config).await?;
    print_json(&manager.preflight(symbol).await)
}

/// 按风险档位生成策略配置，未指定档位时用默认参数
fn profile_strategy(
    id: &str,
    symbols: Vec<String>,
    profile: Option<RiskProfile>,
    weekly_budget: f64,
) -> Result<StrategyConfig> {
    let symbols: Vec<String> = symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    let parameters = profile.map_or_else(StrategyParameters::default, |p| {
        p.strategy_parameters(weekly_budget)
    });
    let mut strategy = StrategyConfig::new(id.trim(), symbols, parameters);
    strategy.updated_at = Some(Utc::now());
    strategy.validate()?;
    Ok(strategy)
}

pub async fn add_strategy(
    config: &AppConfig,
    id: &str,
    symbols: Vec<String>,
    profile: Option<RiskProfile>,
) -> Result<()> {
    let profile = profile.or(config.risk_profile);
    let strategy = profile_strategy(id, symbols, profile, config.budget.weekly_budget)?;
    strategy_repository(config).upsert(strategy.clone()).await?;
    info!(
        "策略已保存: {} {:?} 档位={}",
        strategy.id,
        strategy.symbols,
        profile.map_or("default", |p| p.as_str())
    );
    print_json(&strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_strategy_normalizes_symbols() {
        let strategy = profile_strategy(
            "dip-etf",
            vec![" spy ".into(), "".into(), "qqq".into()],
            Some(RiskProfile::Balanced),
            1_000.0,
        )
        .unwrap();
        assert_eq!(strategy.symbols, vec!["SPY".to_string(), "QQQ".to_string()]);
        assert_eq!(strategy.parameters.position_size, 300.0);
        assert_eq!(strategy.parameters.stop_loss_pct, 5.0);
        assert!(strategy.enabled);

        let plain = profile_strategy("dip-spy", vec!["SPY".into()], None, 200.0).unwrap();
        assert_eq!(plain.parameters, StrategyParameters::default());

        assert!(profile_strategy("empty", vec![" ".into()], None, 200.0).is_err());
    }
}
