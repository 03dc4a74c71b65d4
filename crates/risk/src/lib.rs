//! # Dip Quant Risk
//!
//! 风控闸门：总开关、当日亏损、连续亏损、回撤熔断、下单前检查
//!
//! 所有检查都是纯函数，按固定顺序执行，第一个失败的规则生效。
//! 拦截结果是普通的控制流 (`Decision::Rejected`)，不是错误。

pub mod governor;
pub mod policies;

pub use governor::{Decision, EntryProposal, GateRejection, GateRule, RiskGovernor, StrategyGate};
pub use policies::{DrawdownPolicy, PositionLimitPolicy};
