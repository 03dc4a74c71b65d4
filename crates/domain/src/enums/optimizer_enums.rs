//! 参数优化相关枚举

use serde::{Deserialize, Serialize};

/// 搜索方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// 满足条件时用贝叶斯 (TPE)，否则随机变异
    Auto,
    Bayesian,
    Random,
}

impl std::str::FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(SearchMethod::Auto),
            "bayesian" | "tpe" => Ok(SearchMethod::Bayesian),
            "random" => Ok(SearchMethod::Random),
            other => Err(format!("未知的搜索方式: {}", other)),
        }
    }
}

/// 优化目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Balanced,
    Sharpe,
    Return,
}

impl std::str::FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "balanced" => Ok(Objective::Balanced),
            "sharpe" => Ok(Objective::Sharpe),
            "return" => Ok(Objective::Return),
            other => Err(format!("未知的优化目标: {}", other)),
        }
    }
}

/// 优化任务状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed(_) | JobStatus::Cancelled
        )
    }
}
