//! 仓储接口

use async_trait::async_trait;
use dip_quant_common::AppError;

use crate::entities::{PersistedState, StrategyConfig};

/// 运行状态持久化
///
/// 文件损坏时 `load` 必须返回 `AppError::CorruptedState`，不能当作空状态。
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedState>, AppError>;

    async fn save(&self, state: &PersistedState) -> Result<(), AppError>;
}

/// 策略配置仓储
#[async_trait]
pub trait StrategyConfigRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<StrategyConfig>, AppError>;

    async fn get(&self, id: &str) -> Result<Option<StrategyConfig>, AppError>;

    /// 新增或覆盖，写入前校验
    async fn upsert(&self, config: StrategyConfig) -> Result<(), AppError>;

    async fn delete(&self, id: &str) -> Result<bool, AppError>;
}
