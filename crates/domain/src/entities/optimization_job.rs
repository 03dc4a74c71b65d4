//! 参数优化任务

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::parameters::StrategyParameters;
use crate::enums::{JobStatus, Objective, SearchMethod};

/// 提交优化任务的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub strategy_id: String,
    pub method: SearchMethod,
    pub objective: Objective,
    pub iterations: usize,
    /// 蒙特卡洛情景集成
    pub ensemble: bool,
    pub scenarios: usize,
    /// 前推验证折数，0 表示不做
    pub walk_forward_folds: usize,
    pub min_trades: usize,
    /// 交易数不足时直接判为极差分数
    pub strict_min_trades: bool,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub seed: Option<u64>,
    /// 通过验证后回写策略配置
    pub apply_when_validated: bool,
}

impl OptimizationRequest {
    pub fn new(strategy_id: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            method: SearchMethod::Auto,
            objective: Objective::Balanced,
            iterations: 40,
            ensemble: false,
            scenarios: 8,
            walk_forward_folds: 0,
            min_trades: 5,
            strict_min_trades: false,
            start: None,
            end: None,
            seed: None,
            apply_when_validated: false,
        }
    }
}

/// 集成评估的稳健性统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessSummary {
    pub scenarios: usize,
    pub median_sharpe: f64,
    pub median_return_pct: f64,
    pub p95_drawdown_pct: f64,
    /// 收益为负的情景占比
    pub loss_probability: f64,
    pub median_trades: f64,
}

/// 一个候选参数的评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub parameters: StrategyParameters,
    /// 集成模式下为各情景得分的中位数
    pub score: f64,
    pub total_return_pct: f64,
    pub sharpe: f64,
    pub max_drawdown_pct: f64,
    pub trades: usize,
    pub robustness: Option<RobustnessSummary>,
}

/// 单折前推验证结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub in_sample_score: f64,
    pub parameters: StrategyParameters,
    pub oos_score: f64,
    pub oos_return_pct: f64,
    pub oos_sharpe: f64,
    pub oos_trades: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub folds: Vec<FoldResult>,
    /// 样本外收益非负的折数占比
    pub pass_rate: f64,
    pub avg_oos_score: f64,
    pub worst_fold_return_pct: f64,
    pub validated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub completed: usize,
    pub total: usize,
}

/// 优化任务
///
/// 开始运行后只有进度、心跳和结果字段会变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: String,
    pub request: OptimizationRequest,
    pub status: JobStatus,
    /// 实际采用的搜索方式
    pub effective_method: Option<SearchMethod>,
    pub progress: JobProgress,
    pub best: Option<CandidateSummary>,
    pub walk_forward: Option<WalkForwardSummary>,
    pub validated: bool,
    pub applied: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl OptimizationJob {
    pub fn new(id: impl Into<String>, request: OptimizationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            request,
            status: JobStatus::Queued,
            effective_method: None,
            progress: JobProgress::default(),
            best: None,
            walk_forward: None,
            validated: false,
            applied: false,
            created_at: now,
            started_at: None,
            finished_at: None,
            last_heartbeat_at: None,
        }
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = Some(now);
    }

    /// 运行中且超过 `timeout_secs` 没有心跳
    pub fn is_stale(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let last = self.last_heartbeat_at.or(self.started_at).unwrap_or(self.created_at);
        (now - last).num_seconds() > timeout_secs
    }

    pub fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_stale_detection() {
        let now = Utc::now();
        let mut job = OptimizationJob::new("j1", OptimizationRequest::new("s1"), now);
        assert!(!job.is_stale(now + Duration::hours(1), 300));

        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.heartbeat(now + Duration::seconds(100));
        assert!(!job.is_stale(now + Duration::seconds(350), 300));
        assert!(job.is_stale(now + Duration::seconds(401), 300));
    }
}
