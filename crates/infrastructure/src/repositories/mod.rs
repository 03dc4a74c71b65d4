//! 数据访问层模块
//!
//! 实现 domain 层定义的 Repository 接口。文件仓储写入时先写临时文件再重命名。

pub mod state_repository;
pub mod strategy_config_repository;

pub use state_repository::{JsonStateRepository, MemoryStateRepository};
pub use strategy_config_repository::{
    JsonStrategyConfigRepository, MemoryStrategyConfigRepository,
};

use std::path::Path;

use dip_quant_common::AppError;

/// 原子写入: 写 `<path>.tmp` 后重命名覆盖
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// 读取文件，不存在返回 `None`
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, AppError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("dip-quant-{}", uuid::Uuid::new_v4()))
        .join(name)
}
