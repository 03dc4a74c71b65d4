//! 持仓管理

pub mod position_book;

pub use position_book::{position_key, tranche_legs, ExitSettlement, PositionBook};
