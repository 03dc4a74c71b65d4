//! 应用配置
//!
//! 所有配置从环境变量读取 (`.env` 由 dotenv 加载)，启动时校验，
//! 非法值直接返回配置错误。设置 `RISK_PROFILE` 时风控与预算的默认值取自
//! 该档位，显式设置的环境变量仍然优先。

use std::path::PathBuf;

use dip_quant_common::AppError;
use dip_quant_domain::{
    BrokerKind, BudgetSettings, DrawdownScope, Percentage, RiskLimits, RiskProfile,
};

use super::environment::{env_f64, env_i64, env_is_true, env_opt, env_or_default};

/// 轮询间隔允许范围 (秒)
pub const MIN_TICK_INTERVAL_SECS: u64 = 5;
pub const MAX_TICK_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub state_dir: PathBuf,
    pub strategies_file: PathBuf,
    pub data_dir: PathBuf,
    pub tick_interval_secs: u64,
    /// 启动时若上次处于运行状态则自动恢复
    pub resume_on_boot: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub kind: BrokerKind,
    pub alpaca_api_key: Option<String>,
    pub alpaca_secret_key: Option<String>,
    pub alpaca_paper: bool,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub order_throttle_per_minute: usize,
    /// 模拟盘初始资金
    pub paper_starting_cash: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    /// 无心跳多久判定为失效
    pub stale_secs: i64,
    pub reaper_interval_secs: u64,
    /// 回测手续费 (基点)
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub initial_capital: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub app_env: String,
    pub risk_profile: Option<RiskProfile>,
    pub runner: RunnerSettings,
    pub risk: RiskLimits,
    pub budget: BudgetSettings,
    pub broker: BrokerSettings,
    pub optimizer: OptimizerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_env: "local".to_string(),
            risk_profile: None,
            runner: RunnerSettings {
                state_dir: PathBuf::from("state"),
                strategies_file: PathBuf::from("state/strategies.json"),
                data_dir: PathBuf::from("data"),
                tick_interval_secs: 60,
                resume_on_boot: false,
            },
            risk: RiskLimits::default(),
            budget: BudgetSettings::default(),
            broker: BrokerSettings {
                kind: BrokerKind::Paper,
                alpaca_api_key: None,
                alpaca_secret_key: None,
                alpaca_paper: true,
                timeout_secs: 10,
                max_retries: 3,
                order_throttle_per_minute: 60,
                paper_starting_cash: 100_000.0,
            },
            optimizer: OptimizerSettings {
                stale_secs: 300,
                reaper_interval_secs: 30,
                fee_bps: 5.0,
                slippage_bps: 2.0,
                initial_capital: 10_000.0,
            },
        }
    }
}

fn config_err(msg: impl Into<String>) -> AppError {
    AppError::Config(msg.into())
}

fn percentage(key: &str, default: f64) -> Result<Percentage, AppError> {
    let raw = env_f64(key, default).map_err(config_err)?;
    Percentage::new(raw).map_err(|e| config_err(format!("{}: {}", key, e)))
}

/// 风控与预算的默认值，指定档位时按周预算折算
pub fn profile_defaults(
    profile: Option<RiskProfile>,
    weekly_budget: f64,
) -> (RiskLimits, BudgetSettings) {
    let risk = RiskLimits::default();
    let budget = BudgetSettings {
        weekly_budget,
        ..BudgetSettings::default()
    };
    match profile {
        Some(p) => (p.risk_limits(weekly_budget, &risk), p.budget_settings(&budget)),
        None => (risk, budget),
    }
}

impl AppConfig {
    /// 从环境变量加载并校验
    pub fn from_env() -> Result<Self, AppError> {
        let d = Self::default();

        let state_dir = PathBuf::from(env_or_default("STATE_DIR", "state"));
        let strategies_file = env_opt("STRATEGIES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("strategies.json"));

        let tick = env_i64("TICK_INTERVAL_SECS", d.runner.tick_interval_secs as i64);
        let runner = RunnerSettings {
            state_dir,
            strategies_file,
            data_dir: PathBuf::from(env_or_default("DATA_DIR", "data")),
            tick_interval_secs: u64::try_from(tick)
                .map_err(|_| config_err(format!("TICK_INTERVAL_SECS={} 不能为负", tick)))?,
            resume_on_boot: env_is_true("RESUME_ON_BOOT", false),
        };

        let risk_profile = env_opt("RISK_PROFILE")
            .map(|v| v.parse::<RiskProfile>())
            .transpose()
            .map_err(config_err)?;
        let weekly_budget = env_f64("WEEKLY_BUDGET", d.budget.weekly_budget).map_err(config_err)?;
        let (base_risk, base_budget) = profile_defaults(risk_profile, weekly_budget);

        let max_open_positions = match env_opt("MAX_OPEN_POSITIONS") {
            Some(v) => Some(v.trim().parse::<u32>().map_err(|_| {
                config_err(format!("MAX_OPEN_POSITIONS={} 不是有效整数", v))
            })?),
            None => base_risk.max_open_positions,
        };
        let risk = RiskLimits {
            daily_loss_limit: env_f64("DAILY_LOSS_LIMIT", base_risk.daily_loss_limit)
                .map_err(config_err)?,
            max_position_size: env_f64("MAX_POSITION_SIZE", base_risk.max_position_size)
                .map_err(config_err)?,
            account_max_drawdown: percentage("ACCOUNT_MAX_DRAWDOWN_PCT", 15.0)?,
            drawdown_scope: env_or_default("DRAWDOWN_SCOPE", "strategy")
                .parse::<DrawdownScope>()
                .map_err(config_err)?,
            max_open_positions,
        };

        let max_weekly_loss = match env_opt("MAX_WEEKLY_LOSS_PCT") {
            Some(_) => Some(percentage("MAX_WEEKLY_LOSS_PCT", 0.0)?),
            None => base_budget.max_weekly_loss,
        };
        let budget = BudgetSettings {
            weekly_budget,
            reinvest_profits: env_is_true("REINVEST_PROFITS", d.budget.reinvest_profits),
            reinvest_pct: percentage("REINVEST_PCT", d.budget.reinvest_pct.value())?,
            auto_scale: env_is_true("AUTO_SCALE_BUDGET", d.budget.auto_scale),
            auto_scale_pct: percentage("AUTO_SCALE_PCT", d.budget.auto_scale_pct.value())?,
            auto_scale_after_weeks: env_i64(
                "AUTO_SCALE_AFTER_WEEKS",
                d.budget.auto_scale_after_weeks as i64,
            )
            .clamp(1, 52) as u32,
            max_scale_multiple: d.budget.max_scale_multiple,
            max_weekly_loss,
        };

        let broker = BrokerSettings {
            kind: env_or_default("BROKER", "paper")
                .parse::<BrokerKind>()
                .map_err(config_err)?,
            alpaca_api_key: env_opt("ALPACA_API_KEY"),
            alpaca_secret_key: env_opt("ALPACA_SECRET_KEY"),
            alpaca_paper: env_is_true("ALPACA_PAPER", true),
            timeout_secs: env_i64("BROKER_TIMEOUT_SECS", 10).max(1) as u64,
            max_retries: env_i64("BROKER_MAX_RETRIES", 3).clamp(0, 10) as usize,
            order_throttle_per_minute: env_i64("ORDER_THROTTLE_PER_MINUTE", 60).max(1) as usize,
            paper_starting_cash: env_f64("PAPER_STARTING_CASH", d.broker.paper_starting_cash)
                .map_err(config_err)?,
        };

        let optimizer = OptimizerSettings {
            stale_secs: env_i64("OPTIMIZER_STALE_SECS", d.optimizer.stale_secs).max(10),
            reaper_interval_secs: env_i64("OPTIMIZER_REAPER_SECS", 30).max(1) as u64,
            fee_bps: env_f64("FEE_BPS", d.optimizer.fee_bps).map_err(config_err)?,
            slippage_bps: env_f64("SLIPPAGE_BPS", d.optimizer.slippage_bps).map_err(config_err)?,
            initial_capital: env_f64("BACKTEST_INITIAL_CAPITAL", d.optimizer.initial_capital)
                .map_err(config_err)?,
        };

        let config = Self {
            app_env: env_or_default("APP_ENV", "local"),
            risk_profile,
            runner,
            risk,
            budget,
            broker,
            optimizer,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let tick = self.runner.tick_interval_secs;
        if !(MIN_TICK_INTERVAL_SECS..=MAX_TICK_INTERVAL_SECS).contains(&tick) {
            return Err(config_err(format!(
                "TICK_INTERVAL_SECS={} 超出范围 [{}, {}]",
                tick, MIN_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS
            )));
        }
        if self.risk.daily_loss_limit <= 0.0 {
            return Err(config_err("DAILY_LOSS_LIMIT 必须大于0"));
        }
        if self.risk.max_position_size <= 0.0 {
            return Err(config_err("MAX_POSITION_SIZE 必须大于0"));
        }
        if self.budget.weekly_budget <= 0.0 {
            return Err(config_err("WEEKLY_BUDGET 必须大于0"));
        }
        if self.risk.max_open_positions == Some(0) {
            return Err(config_err("MAX_OPEN_POSITIONS 必须大于0"));
        }
        if self.optimizer.fee_bps < 0.0 || self.optimizer.slippage_bps < 0.0 {
            return Err(config_err("FEE_BPS / SLIPPAGE_BPS 不能为负"));
        }
        if self.broker.kind == BrokerKind::Alpaca
            && (self.broker.alpaca_api_key.is_none() || self.broker.alpaca_secret_key.is_none())
        {
            return Err(config_err(
                "BROKER=alpaca 需要 ALPACA_API_KEY 和 ALPACA_SECRET_KEY",
            ));
        }
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.runner.state_dir.join("state.json")
    }
}
