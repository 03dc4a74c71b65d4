//! 业务实体模块

pub mod budget_state;
pub mod limits;
pub mod optimization_job;
pub mod order;
pub mod parameters;
pub mod persisted_state;
pub mod position;
pub mod risk_profile;
pub mod runner_state;
pub mod safety_state;
pub mod strategy_config;

pub use budget_state::{BudgetState, ScaleEvent, WeekSummary};
pub use limits::{BudgetSettings, RiskLimits};
pub use optimization_job::{
    CandidateSummary, FoldResult, JobProgress, OptimizationJob, OptimizationRequest,
    RobustnessSummary, WalkForwardSummary,
};
pub use order::{OrderAck, OrderRequest};
pub use parameters::{ParamBounds, ParamKey, StrategyParameters};
pub use persisted_state::{PersistedState, STATE_VERSION};
pub use position::{Position, PositionError, TrancheFill};
pub use risk_profile::{ProfilePreset, RiskProfile};
pub use runner_state::{InvalidTransition, RunnerState};
pub use safety_state::{EquityTrack, SafetyState};
pub use strategy_config::StrategyConfig;
