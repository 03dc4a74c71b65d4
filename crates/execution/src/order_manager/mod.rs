//! 订单管理

pub mod order_executor;
pub mod throttle;

pub use order_executor::{LiquidationReport, OrderExecutor};
pub use throttle::OrderThrottle;
