//! # Dip Quant Infrastructure
//!
//! 基础设施层 - 实现领域层定义的接口
//!
//! ## 职责
//!
//! 1. **券商接入**: 模拟盘 `PaperBroker`，Alpaca REST `AlpacaBroker`
//! 2. **状态持久化**: JSON 文件仓储 (原子写入)，内存仓储用于测试
//! 3. **历史数据**: CSV 日线读取
//!
//! ## 架构原则
//!
//! - 实现 `domain` 包中定义的 trait
//! - 可替换性: 不同环境可使用不同实现
//! - 可测试性: 内存实现与故障注入

pub mod brokers;
pub mod market_data;
pub mod repositories;

pub use brokers::{AlpacaBroker, AlpacaCalendar, AlpacaConfig, PaperBroker, PaperFault};
pub use market_data::CsvBarSource;
pub use repositories::{
    JsonStateRepository, JsonStrategyConfigRepository, MemoryStateRepository,
    MemoryStrategyConfigRepository,
};
