//! # Dip Quant Execution
//!
//! 订单执行：分批持仓簿、周预算、下单 (超时/重试/限流)

pub mod budget;
pub mod order_manager;
pub mod position_manager;
pub mod retry;

pub use budget::{BudgetManager, BudgetRejection};
pub use order_manager::{LiquidationReport, OrderExecutor, OrderThrottle};
pub use position_manager::{position_key, tranche_legs, ExitSettlement, PositionBook};
pub use retry::{with_timeout_retry, RetryPolicy};
