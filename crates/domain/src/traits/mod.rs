//! 领域接口
//!
//! 遵循依赖倒置: 编排层依赖这些接口，infrastructure / market 层实现它们。

pub mod bar_source;
pub mod broker;
pub mod calendar;
pub mod repository_trait;

pub use bar_source::BarSource;
pub use broker::{AccountSnapshot, Broker, BrokerPosition};
pub use calendar::{CalendarError, SessionWindow, TradingCalendar};
pub use repository_trait::{StateRepository, StrategyConfigRepository};
