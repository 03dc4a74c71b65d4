//! # Dip Quant Analytics
//!
//! 参数优化: 目标评分、蒙特卡洛情景集成、TPE/随机变异搜索、前推验证。
//!
//! 本包全部为同步 CPU 计算，由编排层放在阻塞线程中执行。

pub mod monte_carlo;
pub mod mutation;
pub mod objective;
pub mod optimizer;
pub mod tpe;
pub mod walk_forward;

pub use monte_carlo::{
    aggregate, calculate_stats, EnsembleEvaluator, Scenario, ScenarioGenerator, Stats,
};
pub use mutation::{mutate_parameters, random_parameters};
pub use objective::{score_report, Evaluation, ObjectiveScore};
pub use optimizer::{
    resolve_method, Optimizer, OptimizerError, OptimizerOutcome, ProgressFn,
    MIN_BAYESIAN_ITERATIONS,
};
pub use tpe::TpeSampler;
pub use walk_forward::{plan_folds, run_walk_forward, summarize, FoldPlan, MIN_TRAIN_DAYS};
