//! 业务枚举

pub mod optimizer_enums;
pub mod order_enums;
pub mod runner_enums;
pub mod strategy_enums;

pub use optimizer_enums::{JobStatus, Objective, SearchMethod};
pub use order_enums::{ExitReason, OrderIntent, OrderSide, OrderStatus};
pub use runner_enums::{BrokerKind, DrawdownScope, RunnerStatus};
pub use strategy_enums::Regime;
