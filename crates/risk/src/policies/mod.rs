//! 风控策略模块

pub mod drawdown_policy;
pub mod position_limit_policy;

pub use drawdown_policy::DrawdownPolicy;
pub use position_limit_policy::PositionLimitPolicy;
