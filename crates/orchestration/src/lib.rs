//! # Dip Quant Orchestration
//!
//! 编排层：运行器调度、人工命令、参数优化后台任务、周期任务

pub mod optimizer_jobs;
pub mod runner;
pub mod scheduler;

pub use optimizer_jobs::{JobError, OptimizationJobManager};
pub use runner::{
    PanicStopReport, Preflight, RestoreOutcome, RunnerCommandError, RunnerDeps, RunnerManager,
    RunnerOptions, SafetyStatus, TickOutcome,
};
pub use scheduler::{SchedulerError, TaskScheduler};
