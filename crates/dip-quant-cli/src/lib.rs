//! # Dip Quant CLI
//!
//! 买跌策略自动交易主程序入口

pub mod app;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dip_quant_core::AppConfig;
use dip_quant_domain::{Objective, RiskProfile, SearchMethod};
use dotenv::dotenv;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dip-quant", version, about = "美股买跌策略自动交易")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// 启动运行器循环，直到收到 SIGINT/SIGTERM
    Run {
        /// 启动后立即开始交易 (否则仅在 RESUME_ON_BOOT 且上次在运行时恢复)
        #[arg(long)]
        start: bool,
    },
    /// 用本地 CSV 日线回测策略
    Backtest {
        #[arg(long)]
        strategy: String,
        /// 开始交易日期，之前的数据只用于指标预热
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// 参数优化
    Optimize(OptimizeArgs),
    /// 查看持久化的运行器与风控状态
    Status,
    /// 打开或关闭总开关
    KillSwitch {
        state: Switch,
        #[arg(long)]
        reason: Option<String>,
    },
    /// 紧急停止: 打开总开关并平掉所有持仓
    PanicStop,
    /// 重置策略的连续亏损计数
    ResetLosses { strategy: String },
    /// 把回撤峰值重置为当前权益
    ResetPeak,
    /// 下单前检查某个标的是否允许开仓
    Preflight { symbol: String },
    /// 新增或覆盖策略配置，参数取自风险档位 (默认 RISK_PROFILE)
    AddStrategy {
        #[arg(long)]
        id: String,
        /// 逗号分隔的标的列表
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        #[arg(long)]
        profile: Option<RiskProfile>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

#[derive(Args, Debug, PartialEq)]
pub struct OptimizeArgs {
    #[arg(long)]
    pub strategy: String,
    #[arg(long, default_value = "auto")]
    pub method: SearchMethod,
    #[arg(long, default_value = "balanced")]
    pub objective: Objective,
    #[arg(long, default_value_t = 40)]
    pub iterations: usize,
    /// 蒙特卡洛情景集成评估
    #[arg(long)]
    pub ensemble: bool,
    #[arg(long, default_value_t = 8)]
    pub scenarios: usize,
    /// 前推验证折数，0 表示不做
    #[arg(long, default_value_t = 0)]
    pub folds: usize,
    #[arg(long, default_value_t = 5)]
    pub min_trades: usize,
    /// 交易数不足直接判为极差分数
    #[arg(long)]
    pub strict_min_trades: bool,
    #[arg(long)]
    pub start: Option<NaiveDate>,
    #[arg(long)]
    pub end: Option<NaiveDate>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// 通过前推验证后写回策略配置
    #[arg(long)]
    pub apply: bool,
}

/// 应用初始化: 加载 .env 并设置日志
pub fn app_init() -> Result<()> {
    dotenv().ok();
    dip_quant_core::logger::setup_logging()?;
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env().context("加载配置失败")?;
    info!(
        "配置加载完成: env={}, broker={:?}, state_dir={}",
        config.app_env,
        config.broker.kind,
        config.runner.state_dir.display()
    );

    match cli.command {
        Command::Run { start } => app::run_runner(&config, start).await,
        Command::Backtest { strategy, start, end } => {
            app::run_backtest(&config, &strategy, start, end).await
        }
        Command::Optimize(args) => app::run_optimize(&config, args).await,
        Command::Status => app::show_status(&config).await,
        Command::KillSwitch { state, reason } => {
            app::set_kill_switch(&config, state == Switch::On, reason).await
        }
        Command::PanicStop => app::panic_stop(&config).await,
        Command::ResetLosses { strategy } => app::reset_losses(&config, &strategy).await,
        Command::ResetPeak => app::reset_peak(&config).await,
        Command::Preflight { symbol } => app::preflight(&config, &symbol).await,
        Command::AddStrategy {
            id,
            symbols,
            profile,
        } => app::add_strategy(&config, &id, symbols, profile).await,
    }
}
