//! 策略配置仓储
//!
//! 文件格式为 `StrategyConfig` 数组，写入前逐条校验。

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use dip_quant_common::AppError;
use dip_quant_domain::{StrategyConfig, StrategyConfigRepository};
use tokio::sync::Mutex;
use tracing::info;

use super::{read_optional, write_atomic};

pub struct JsonStrategyConfigRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStrategyConfigRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<StrategyConfig>, AppError> {
        match read_optional(&self.path).await? {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AppError::Config(format!("策略配置文件解析失败 {}: {}", self.path.display(), e))
            }),
        }
    }

    async fn write_all(&self, configs: &[StrategyConfig]) -> Result<(), AppError> {
        let bytes = serde_json::to_vec_pretty(configs)?;
        write_atomic(&self.path, &bytes).await
    }
}

fn upsert_into(configs: &mut Vec<StrategyConfig>, mut config: StrategyConfig) {
    config.updated_at = Some(Utc::now());
    match configs.iter_mut().find(|c| c.id == config.id) {
        Some(existing) => *existing = config,
        None => configs.push(config),
    }
}

#[async_trait]
impl StrategyConfigRepository for JsonStrategyConfigRepository {
    async fn list(&self) -> Result<Vec<StrategyConfig>, AppError> {
        self.read_all().await
    }

    async fn get(&self, id: &str) -> Result<Option<StrategyConfig>, AppError> {
        Ok(self.read_all().await?.into_iter().find(|c| c.id == id))
    }

    async fn upsert(&self, config: StrategyConfig) -> Result<(), AppError> {
        config.validate()?;
        let _guard = self.lock.lock().await;
        let mut configs = self.read_all().await?;
        info!("保存策略配置: {}", config.id);
        upsert_into(&mut configs, config);
        self.write_all(&configs).await
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let _guard = self.lock.lock().await;
        let mut configs = self.read_all().await?;
        let before = configs.len();
        configs.retain(|c| c.id != id);
        if configs.len() == before {
            return Ok(false);
        }
        self.write_all(&configs).await?;
        Ok(true)
    }
}

/// 内存策略配置仓储
#[derive(Default)]
pub struct MemoryStrategyConfigRepository {
    configs: Mutex<Vec<StrategyConfig>>,
}

impl MemoryStrategyConfigRepository {
    pub fn new(configs: Vec<StrategyConfig>) -> Self {
        Self {
            configs: Mutex::new(configs),
        }
    }
}

#[async_trait]
impl StrategyConfigRepository for MemoryStrategyConfigRepository {
    async fn list(&self) -> Result<Vec<StrategyConfig>, AppError> {
        Ok(self.configs.lock().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<StrategyConfig>, AppError> {
        Ok(self.configs.lock().await.iter().find(|c| c.id == id).cloned())
    }

    async fn upsert(&self, config: StrategyConfig) -> Result<(), AppError> {
        config.validate()?;
        upsert_into(&mut *self.configs.lock().await, config);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let mut configs = self.configs.lock().await;
        let before = configs.len();
        configs.retain(|c| c.id != id);
        Ok(configs.len() != before)
    }
}
