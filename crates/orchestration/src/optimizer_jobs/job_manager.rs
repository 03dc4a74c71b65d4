//! 参数优化任务管理
//!
//! 每个任务在 `spawn_blocking` 线程里跑优化器，进度经 mpsc 回传并刷新心跳。
//! 任务状态只保存在本管理器中，失败只影响该任务，不会触碰运行器状态。
//! 超过 `stale_secs` 没有心跳的运行中任务由 `reap_stale` 标记为失败，重启即重新提交。
//! 已结束的任务最多保留 `MAX_FINISHED_JOBS` 个，超出时先删最早结束的。

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dip_quant_analytics::{Optimizer, OptimizerError, OptimizerOutcome};
use dip_quant_common::{AppError, Bar};
use dip_quant_domain::{
    BarSource, CandidateSummary, JobProgress, JobStatus, OptimizationJob, OptimizationRequest,
    StrategyConfig, StrategyConfigRepository,
};
use dip_quant_strategies::BacktestConfig;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_STALE_SECS: i64 = 300;
pub const STALE_REASON: &str = "stale: no heartbeat";
pub const MAX_FINISHED_JOBS: usize = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("策略不存在: {0}")]
    StrategyNotFound(String),

    #[error("优化请求无效: {0}")]
    InvalidRequest(String),

    #[error("任务不存在: {0}")]
    NotFound(String),

    #[error("任务已结束: {0}")]
    AlreadyFinished(String),

    #[error(transparent)]
    App(#[from] AppError),
}

struct ProgressEvent {
    progress: JobProgress,
    best: CandidateSummary,
}

#[derive(Clone)]
pub struct OptimizationJobManager {
    jobs: Arc<DashMap<String, OptimizationJob>>,
    cancel_flags: Arc<DashMap<String, Arc<AtomicBool>>>,
    strategies: Arc<dyn StrategyConfigRepository>,
    bars: Arc<dyn BarSource>,
    backtest: BacktestConfig,
    stale_secs: i64,
    max_finished: usize,
}

impl OptimizationJobManager {
    pub fn new(
        strategies: Arc<dyn StrategyConfigRepository>,
        bars: Arc<dyn BarSource>,
        backtest: BacktestConfig,
        stale_secs: i64,
    ) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            cancel_flags: Arc::new(DashMap::new()),
            strategies,
            bars,
            backtest,
            stale_secs,
            max_finished: MAX_FINISHED_JOBS,
        }
    }

    pub fn with_finished_retention(mut self, max_finished: usize) -> Self {
        self.max_finished = max_finished;
        self
    }

    fn validate(request: &OptimizationRequest) -> Result<(), JobError> {
        if request.iterations == 0 {
            return Err(JobError::InvalidRequest("迭代次数必须大于 0".to_string()));
        }
        if request.ensemble && request.scenarios < 2 {
            return Err(JobError::InvalidRequest(
                "情景集成至少需要 2 个情景".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (request.start, request.end) {
            if end <= start {
                return Err(JobError::InvalidRequest(format!(
                    "结束日期 {} 不晚于开始日期 {}",
                    end, start
                )));
            }
        }
        Ok(())
    }

    /// 提交任务，返回任务ID
    pub async fn submit(&self, request: OptimizationRequest) -> Result<String, JobError> {
        Self::validate(&request)?;
        let config = self
            .strategies
            .get(&request.strategy_id)
            .await?
            .ok_or_else(|| JobError::StrategyNotFound(request.strategy_id.clone()))?;

        let id = Uuid::new_v4().to_string();
        info!(
            "提交优化任务 {}: 策略 {}, {:?} x{}, 集成={}, 前推折数={}",
            id,
            request.strategy_id,
            request.method,
            request.iterations,
            request.ensemble,
            request.walk_forward_folds
        );
        self.evict_finished();
        self.jobs
            .insert(id.clone(), OptimizationJob::new(id.as_str(), request, Utc::now()));
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(id.clone(), cancel.clone());

        let manager = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            manager.run_job(job_id, config, cancel).await;
        });
        Ok(id)
    }

    pub fn poll(&self, id: &str) -> Option<OptimizationJob> {
        self.jobs.get(id).map(|job| job.clone())
    }

    pub fn list(&self) -> Vec<OptimizationJob> {
        let mut jobs: Vec<OptimizationJob> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// 取消任务，工作线程在两个候选之间检查取消标记
    pub fn cancel(&self, id: &str) -> Result<(), JobError> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyFinished(id.to_string()));
        }
        if let Some(flag) = self.cancel_flags.get(id) {
            flag.store(true, Ordering::SeqCst);
        }
        if job.status == JobStatus::Queued {
            job.finish(JobStatus::Cancelled, Utc::now());
        }
        info!("已请求取消优化任务 {}", id);
        Ok(())
    }

    /// 心跳超时的运行中任务标记为失败，返回被回收的任务ID
    pub fn reap_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut reaped = Vec::new();
        for mut job in self.jobs.iter_mut() {
            if !job.is_stale(now, self.stale_secs) {
                continue;
            }
            job.finish(JobStatus::Failed(STALE_REASON.to_string()), now);
            if let Some(flag) = self.cancel_flags.get(job.key()) {
                flag.store(true, Ordering::SeqCst);
            }
            warn!(
                "优化任务 {} 超过 {}s 没有心跳，标记为失败",
                job.key(),
                self.stale_secs
            );
            reaped.push(job.key().clone());
        }
        self.evict_finished();
        reaped
    }

    /// 删除超出保留数量的已结束任务，返回删除个数
    pub fn evict_finished(&self) -> usize {
        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal())
            .map(|j| (j.finished_at.unwrap_or(j.created_at), j.key().clone()))
            .collect();
        if finished.len() <= self.max_finished {
            return 0;
        }
        finished.sort();
        let overflow = finished.len() - self.max_finished;
        for (_, id) in finished.into_iter().take(overflow) {
            self.jobs.remove(&id);
            self.cancel_flags.remove(&id);
        }
        info!("清理 {} 个已结束的优化任务", overflow);
        overflow
    }

    /// 修改未结束的任务，任务已结束或不存在时返回 false
    fn update(&self, id: &str, f: impl FnOnce(&mut OptimizationJob)) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if !job.status.is_terminal() => {
                f(&mut job);
                true
            }
            _ => false,
        }
    }

    fn finish(&self, id: &str, status: JobStatus) {
        let now = Utc::now();
        let finished = self.update(id, |job| {
            job.heartbeat(now);
            job.finish(status.clone(), now);
        });
        if finished {
            match &status {
                JobStatus::Failed(reason) => error!("优化任务 {} 失败: {}", id, reason),
                other => info!("优化任务 {} 结束: {:?}", id, other),
            }
        }
        self.cancel_flags.remove(id);
    }

    async fn run_job(self, id: String, config: StrategyConfig, cancel: Arc<AtomicBool>) {
        let outcome = match self.execute(&id, &config, cancel).await {
            Ok(outcome) => outcome,
            Err(status) => {
                self.finish(&id, status);
                return;
            }
        };

        let validated = outcome.validated();
        let wants_apply = match self.jobs.get(&id) {
            Some(job) if !job.status.is_terminal() => job.request.apply_when_validated,
            _ => {
                warn!("优化任务 {} 已结束，丢弃本次结果", id);
                self.cancel_flags.remove(&id);
                return;
            }
        };
        let applied = validated && wants_apply && self.apply(&config, &outcome.best).await;

        let now = Utc::now();
        let best = outcome.best;
        let walk_forward = outcome.walk_forward;
        let stored = self.update(&id, |job| {
            job.effective_method = Some(outcome.method);
            job.progress.completed = outcome.evaluated;
            job.best = Some(best.clone());
            job.walk_forward = walk_forward;
            job.validated = validated;
            job.applied = applied;
            job.heartbeat(now);
            job.finish(JobStatus::Completed, now);
        });
        if stored {
            info!(
                "优化任务 {} 完成: 得分 {:.3}, 收益 {:.2}%, 验证={}, 已写回={}",
                id, best.score, best.total_return_pct, validated, applied
            );
        }
        self.cancel_flags.remove(&id);
    }

    async fn execute(
        &self,
        id: &str,
        config: &StrategyConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<OptimizerOutcome, JobStatus> {
        let request = match self.jobs.get(id) {
            Some(job) if job.status.is_terminal() => return Err(job.status.clone()),
            Some(job) => job.request.clone(),
            None => return Err(JobStatus::Failed(format!("任务不存在: {}", id))),
        };
        let series = self
            .load_series(config, &request)
            .await
            .map_err(|e| JobStatus::Failed(e.to_string()))?;

        let started = Utc::now();
        let running = self.update(id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(started);
            job.heartbeat(started);
        });
        if !running {
            return Err(JobStatus::Cancelled);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let base = config.parameters.clone();
        let backtest = self.backtest.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let optimizer = Optimizer::new(&request, base, backtest, &series);
            let mut on_progress = |progress: JobProgress, best: &CandidateSummary| {
                let event = ProgressEvent {
                    progress,
                    best: best.clone(),
                };
                if tx.send(event).is_err() || cancel.load(Ordering::SeqCst) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            };
            optimizer.run(&mut on_progress)
        });

        while let Some(event) = rx.recv().await {
            self.update(id, |job| {
                job.progress = event.progress;
                job.best = Some(event.best);
                job.heartbeat(Utc::now());
            });
        }

        match worker.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(OptimizerError::Cancelled)) => Err(JobStatus::Cancelled),
            Ok(Err(e)) => Err(JobStatus::Failed(e.to_string())),
            Err(e) => Err(JobStatus::Failed(format!("优化线程异常退出: {}", e))),
        }
    }

    /// 加载策略全部标的的日线，起点不截断，留给指标预热
    async fn load_series(
        &self,
        config: &StrategyConfig,
        request: &OptimizationRequest,
    ) -> Result<BTreeMap<String, Vec<Bar>>, AppError> {
        let mut series = BTreeMap::new();
        for symbol in &config.symbols {
            let bars = self.bars.load_bars(symbol, None, request.end).await?;
            if bars.is_empty() {
                warn!("{} 没有历史数据，跳过", symbol);
                continue;
            }
            series.insert(symbol.clone(), bars);
        }
        if series.is_empty() {
            return Err(AppError::Validation(format!(
                "策略 {} 没有可用的历史数据",
                config.id
            )));
        }
        Ok(series)
    }

    /// 写回最优参数，重新读取配置以保留期间的其他修改
    async fn apply(&self, config: &StrategyConfig, best: &CandidateSummary) -> bool {
        let mut latest = match self.strategies.get(&config.id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                warn!("策略 {} 已被删除，不写回参数", config.id);
                return false;
            }
            Err(e) => {
                warn!("读取策略 {} 失败，不写回参数: {}", config.id, e);
                return false;
            }
        };
        latest.parameters = best.parameters.clone();
        match self.strategies.upsert(latest).await {
            Ok(()) => {
                info!("已将验证通过的参数写回策略 {}", config.id);
                true
            }
            Err(e) => {
                warn!("写回策略 {} 参数失败: {}", config.id, e);
                false
            }
        }
    }
}
