//! 运行器管理器
//!
//! 对外提供人工命令与状态查询。`RunnerCore` 放在一把 `tokio::sync::Mutex` 后面，
//! tick 与命令都要先拿锁，因此命令不会与进行中的 tick 交错。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dip_quant_common::AppError;
use dip_quant_domain::{RunnerState, RunnerStatus};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use super::error::RunnerCommandError;
use super::runner_core::{
    PanicStopReport, Preflight, RestoreOutcome, RunnerCore, RunnerDeps, RunnerOptions,
    SafetyStatus, TickOutcome,
};

pub struct RunnerManager {
    core: Arc<Mutex<RunnerCore>>,
    shutdown: watch::Sender<bool>,
}

impl RunnerManager {
    pub fn new(deps: RunnerDeps, options: RunnerOptions) -> Result<Self, AppError> {
        options.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            core: Arc::new(Mutex::new(RunnerCore::new(deps, options, Utc::now()))),
            shutdown,
        })
    }

    pub async fn restore(&self) -> Result<RestoreOutcome, AppError> {
        self.core.lock().await.restore().await
    }

    pub async fn start(&self) -> Result<RunnerStatus, RunnerCommandError> {
        self.start_at(Utc::now()).await
    }

    pub async fn start_at(&self, now: DateTime<Utc>) -> Result<RunnerStatus, RunnerCommandError> {
        self.core.lock().await.start(now).await
    }

    pub async fn stop(&self) -> Result<(), RunnerCommandError> {
        self.core.lock().await.stop(Utc::now()).await
    }

    pub async fn panic_stop(&self) -> Result<PanicStopReport, RunnerCommandError> {
        self.core.lock().await.panic_stop(Utc::now()).await
    }

    pub async fn set_kill_switch(
        &self,
        enabled: bool,
        reason: Option<String>,
    ) -> Result<(), RunnerCommandError> {
        self.core
            .lock()
            .await
            .set_kill_switch(enabled, reason, Utc::now())
            .await
    }

    pub async fn reset_consecutive_losses(&self, strategy_id: &str) -> Result<(), RunnerCommandError> {
        self.core
            .lock()
            .await
            .reset_consecutive_losses(strategy_id, Utc::now())
            .await
    }

    pub async fn reset_drawdown_peak(&self) -> Result<(), RunnerCommandError> {
        self.core.lock().await.reset_drawdown_peak(Utc::now()).await
    }

    pub async fn runner_snapshot(&self) -> RunnerState {
        self.core.lock().await.runner().clone()
    }

    pub async fn safety_status(&self) -> SafetyStatus {
        self.core.lock().await.safety_status()
    }

    pub async fn preflight(&self, symbol: &str) -> Preflight {
        self.core.lock().await.preflight(symbol).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        self.core.lock().await.tick_at(now).await
    }

    /// 供测试和状态页读取内部状态
    pub fn core(&self) -> &Arc<Mutex<RunnerCore>> {
        &self.core
    }

    /// 启动调度循环，间隔取运行器状态中的 tick 间隔
    ///
    /// 上一个 tick 结束后才会开始下一个；关闭信号在 tick 之间生效，
    /// 进行中的券商调用不会被中断。
    pub async fn spawn_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let secs = self.core.lock().await.runner().tick_interval_secs;
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("运行器调度循环启动，间隔 {}s", secs);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = manager.tick_at(Utc::now()).await;
                        debug!("tick 完成: {:?}", outcome);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("运行器调度循环退出");
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
