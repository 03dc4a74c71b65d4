//! 运行状态仓储

use std::path::PathBuf;

use async_trait::async_trait;
use dip_quant_common::AppError;
use dip_quant_domain::entities::STATE_VERSION;
use dip_quant_domain::{PersistedState, StateRepository};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::{read_optional, write_atomic};

/// JSON 文件状态仓储
pub struct JsonStateRepository {
    path: PathBuf,
    // 串行化并发写入，避免临时文件互相覆盖
    write_lock: Mutex<()>,
}

impl JsonStateRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl StateRepository for JsonStateRepository {
    async fn load(&self) -> Result<Option<PersistedState>, AppError> {
        let Some(bytes) = read_optional(&self.path).await? else {
            debug!("状态文件不存在: {}", self.path.display());
            return Ok(None);
        };
        let state: PersistedState = serde_json::from_slice(&bytes).map_err(|e| {
            error!("状态文件解析失败: {}: {}", self.path.display(), e);
            AppError::CorruptedState(format!("{}: {}", self.path.display(), e))
        })?;
        if state.version > STATE_VERSION {
            return Err(AppError::CorruptedState(format!(
                "状态文件版本 {} 高于当前支持的 {}",
                state.version, STATE_VERSION
            )));
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), AppError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, &bytes).await
    }
}

/// 内存状态仓储，用于测试
#[derive(Default)]
pub struct MemoryStateRepository {
    state: Mutex<Option<PersistedState>>,
    corrupted: bool,
}

impl MemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            corrupted: false,
        }
    }

    /// 模拟损坏的状态文件: `load` 总是返回 `CorruptedState`
    pub fn corrupted() -> Self {
        Self {
            state: Mutex::new(None),
            corrupted: true,
        }
    }

    pub async fn snapshot(&self) -> Option<PersistedState> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl StateRepository for MemoryStateRepository {
    async fn load(&self) -> Result<Option<PersistedState>, AppError> {
        if self.corrupted {
            return Err(AppError::CorruptedState("memory://state".to_string()));
        }
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), AppError> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::temp_path;
    use chrono::{NaiveDate, Utc};
    use dip_quant_domain::{BudgetState, RunnerState, SafetyState};

    fn sample_state() -> PersistedState {
        let mut safety = SafetyState::default();
        safety.engage_kill_switch("panic", Utc::now());
        safety.record_trade_result("s1", -12.5);
        PersistedState {
            version: STATE_VERSION,
            runner: RunnerState::stopped(vec!["s1".into()], 60),
            safety,
            budget: BudgetState::new(200.0, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            positions: vec![],
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let repo = JsonStateRepository::new(temp_path("state.json"));
        assert_eq!(repo.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_then_load_keeps_safety_state() {
        let repo = JsonStateRepository::new(temp_path("state.json"));
        let state = sample_state();
        repo.save(&state).await.unwrap();

        let loaded = repo.load().await.unwrap().unwrap();
        assert!(loaded.safety.kill_switch);
        assert_eq!(loaded.safety.consecutive_losses_for("s1"), 1);
        assert_eq!(loaded, state);

        let mut tmp = repo.path().as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!std::path::Path::new(&tmp).exists());
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupted_not_empty() {
        let path = temp_path("state.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let repo = JsonStateRepository::new(&path);
        assert!(matches!(repo.load().await, Err(AppError::CorruptedState(_))));
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let repo = JsonStateRepository::new(temp_path("state.json"));
        let mut state = sample_state();
        state.version = STATE_VERSION + 1;
        repo.save(&state).await.unwrap();
        assert!(matches!(repo.load().await, Err(AppError::CorruptedState(_))));
    }

    #[tokio::test]
    async fn test_memory_corrupted() {
        let repo = MemoryStateRepository::corrupted();
        assert!(repo.load().await.unwrap_err().is_fatal());
    }
}
