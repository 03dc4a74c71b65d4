//! # Dip Quant Core
//!
//! 核心基础设施：环境配置、日志、优雅关闭

pub mod config;
pub mod logger;

pub use config::{AppConfig, ShutdownConfig, ShutdownManager};
