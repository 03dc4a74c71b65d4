//! # 应用启动引导
//!
//! 根据 `AppConfig` 组装券商、交易日历、仓储与运行器参数。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dip_quant_core::AppConfig;
use dip_quant_domain::{
    BarSource, Broker, BrokerKind, StrategyConfigRepository, TradingCalendar,
};
use dip_quant_execution::RetryPolicy;
use dip_quant_infrastructure::{
    AlpacaBroker, AlpacaCalendar, AlpacaConfig, CsvBarSource, JsonStateRepository,
    JsonStrategyConfigRepository, PaperBroker,
};
use dip_quant_market::{MarketClock, WeekdayCalendar};
use dip_quant_orchestration::{RunnerDeps, RunnerOptions};
use dip_quant_strategies::BacktestConfig;
use tracing::{info, warn};

pub fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_secs(config.broker.timeout_secs),
        config.broker.max_retries,
    )
}

pub fn runner_options(config: &AppConfig) -> RunnerOptions {
    RunnerOptions {
        tick_interval_secs: config.runner.tick_interval_secs,
        risk: config.risk.clone(),
        budget: config.budget.clone(),
        retry: retry_policy(config),
        throttle_per_minute: u32::try_from(config.broker.order_throttle_per_minute)
            .unwrap_or(u32::MAX),
    }
}

/// 回测沿用实盘的当日亏损与单标的持仓上限
pub fn backtest_config(config: &AppConfig) -> BacktestConfig {
    BacktestConfig {
        initial_capital: config.optimizer.initial_capital,
        fee_bps: config.optimizer.fee_bps,
        slippage_bps: config.optimizer.slippage_bps,
        daily_loss_limit: Some(config.risk.daily_loss_limit),
        max_position_size: Some(config.risk.max_position_size),
        ..BacktestConfig::default()
    }
}

pub fn strategy_repository(config: &AppConfig) -> Arc<JsonStrategyConfigRepository> {
    Arc::new(JsonStrategyConfigRepository::new(
        config.runner.strategies_file.clone(),
    ))
}

pub fn bar_source(config: &AppConfig) -> Arc<CsvBarSource> {
    Arc::new(CsvBarSource::new(config.runner.data_dir.clone()))
}

/// 模拟盘用本地 CSV 日线作为行情
async fn paper_broker(
    config: &AppConfig,
    strategies: &dyn StrategyConfigRepository,
) -> Result<Arc<PaperBroker>> {
    let broker = Arc::new(PaperBroker::new(config.broker.paper_starting_cash));
    let bars = bar_source(config);
    let mut symbols: Vec<String> = strategies
        .list()
        .await?
        .into_iter()
        .flat_map(|c| c.symbols)
        .collect();
    symbols.sort();
    symbols.dedup();
    for symbol in symbols {
        match bars.load_bars(&symbol, None, None).await {
            Ok(series) if !series.is_empty() => {
                info!("模拟盘载入 {} 日线 {} 根", symbol, series.len());
                broker.set_bars(&symbol, series).await;
            }
            Ok(_) => warn!("{} 没有本地日线，模拟盘无法对其报价", symbol),
            Err(e) => warn!("读取 {} 日线失败: {}", symbol, e),
        }
    }
    Ok(broker)
}

pub async fn build_runner_deps(config: &AppConfig) -> Result<RunnerDeps> {
    let strategy_repo = strategy_repository(config);
    let (broker, calendar): (Arc<dyn Broker>, Arc<dyn TradingCalendar>) = match config.broker.kind
    {
        BrokerKind::Paper => {
            let broker: Arc<dyn Broker> = paper_broker(config, strategy_repo.as_ref()).await?;
            let calendar: Arc<dyn TradingCalendar> = Arc::new(WeekdayCalendar::nyse());
            (broker, calendar)
        }
        BrokerKind::Alpaca => {
            let alpaca = AlpacaConfig {
                api_key: config
                    .broker
                    .alpaca_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("缺少 ALPACA_API_KEY"))?,
                secret_key: config
                    .broker
                    .alpaca_secret_key
                    .clone()
                    .ok_or_else(|| anyhow!("缺少 ALPACA_SECRET_KEY"))?,
                paper: config.broker.alpaca_paper,
                timeout: Duration::from_secs(config.broker.timeout_secs),
            };
            let broker = AlpacaBroker::new(&alpaca).context("初始化 Alpaca 客户端失败")?;
            let calendar: Arc<dyn TradingCalendar> = Arc::new(AlpacaCalendar::new(broker.client()));
            let broker: Arc<dyn Broker> = Arc::new(broker);
            (broker, calendar)
        }
    };
    info!("券商: {:?}", config.broker.kind);

    Ok(RunnerDeps {
        broker,
        clock: MarketClock::new(calendar, chrono_tz::America::New_York),
        state_repo: Arc::new(JsonStateRepository::new(config.state_file())),
        strategy_repo,
    })
}
