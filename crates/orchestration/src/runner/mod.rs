//! 运行器调度: 状态机、tick、人工命令

pub mod error;
pub mod runner_core;
pub mod runner_manager;

pub use error::RunnerCommandError;
pub use runner_core::{
    PanicStopReport, Preflight, RestoreOutcome, RunnerCore, RunnerDeps, RunnerOptions,
    SafetyStatus, TickOutcome, MAX_TICK_INTERVAL_SECS, MIN_TICK_INTERVAL_SECS,
};
pub use runner_manager::RunnerManager;
