//! # Dip Quant Domain
//!
//! 领域模型层 - 纯粹的业务逻辑，不依赖任何基础设施
//!
//! ## 模块组织
//!
//! - `entities`: 业务实体，如 StrategyConfig, RunnerState, SafetyState, Position
//! - `value_objects`: 值对象，如 Percentage
//! - `enums`: 业务枚举，如 RunnerStatus, ExitReason, Regime
//! - `traits`: 领域接口，如 Broker, TradingCalendar, StateRepository

pub mod entities;
pub mod enums;
pub mod traits;
pub mod value_objects;

// 重新导出核心类型
pub use entities::{
    BudgetSettings, BudgetState, CandidateSummary, FoldResult, JobProgress, OptimizationJob,
    OptimizationRequest, OrderAck, OrderRequest, ParamBounds, ParamKey, PersistedState, Position,
    PositionError, ProfilePreset, RiskLimits, RiskProfile, RobustnessSummary, RunnerState,
    SafetyState, StrategyConfig, StrategyParameters, TrancheFill, WalkForwardSummary, WeekSummary,
};
pub use enums::{
    BrokerKind, DrawdownScope, ExitReason, JobStatus, Objective, OrderIntent, OrderSide,
    OrderStatus, Regime, RunnerStatus, SearchMethod,
};
pub use traits::{
    AccountSnapshot, BarSource, Broker, BrokerPosition, CalendarError, SessionWindow,
    StateRepository, StrategyConfigRepository, TradingCalendar,
};
pub use value_objects::{Percentage, PercentageError};
