//! 统一错误类型定义
//!
//! 错误分为四类:
//! - 临时错误 (`BrokerTransient`): 超时、限流，按退避策略重试，不改变运行状态
//! - 配置错误 (`Config` / `Validation`): 命令执行时同步拒绝
//! - 致命错误 (`BrokerFatal` / `CorruptedState`): 运行器进入 ERROR，需要人工重启
//! - 其他 (`Storage` / `Parse` / `BrokerRejected` / `Unknown`)
//!
//! 风控拦截不是错误，见 `dip_quant_risk::GateRejection`。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("券商临时错误: {0}")]
    BrokerTransient(String),

    #[error("券商致命错误: {0}")]
    BrokerFatal(String),

    #[error("券商拒绝订单: {0}")]
    BrokerRejected(String),

    #[error("持久化状态损坏: {0}")]
    CorruptedState(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("解析错误: {0}")]
    Parse(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl AppError {
    /// 是否可以重试
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::BrokerTransient(_))
    }

    /// 是否需要将运行器切换到 ERROR
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::BrokerFatal(_) | AppError::CorruptedState(_))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Unknown(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Parse(e.to_string())
    }
}
