//! # Dip Quant Market
//!
//! 交易时段：交易日历与市场时钟

pub mod calendar;
pub mod clock;

pub use calendar::WeekdayCalendar;
pub use clock::{MarketClock, SessionState};
