//! 参数优化后台任务

pub mod job_manager;

pub use job_manager::{JobError, OptimizationJobManager, DEFAULT_STALE_SECS, STALE_REASON};
