use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// 周期任务的最小间隔
pub const MIN_INTERVAL_MILLIS: u64 = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("任务间隔 {0}ms 小于下限 100ms")]
    IntervalTooShort(u64),

    #[error("任务已存在: {0}")]
    DuplicateTask(String),
}

/// 周期任务调度器，用于后台维护类任务 (如回收超时的优化任务)
pub struct TaskScheduler {
    periodic_tasks: HashMap<String, JoinHandle<()>>,
    shutdown_sender: broadcast::Sender<()>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (shutdown_sender, _) = broadcast::channel(16);
        Self {
            periodic_tasks: HashMap::new(),
            shutdown_sender,
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn add_periodic_task<F, Fut>(
        &mut self,
        name: impl Into<String>,
        every_n_millis: u64,
        task_fn: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if every_n_millis < MIN_INTERVAL_MILLIS {
            return Err(SchedulerError::IntervalTooShort(every_n_millis));
        }
        if self.periodic_tasks.contains_key(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }

        let mut interval_timer = interval(Duration::from_millis(every_n_millis));
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        task_fn().await;
                    }
                    _ = shutdown_receiver.recv() => {
                        debug!("周期任务 {} 退出", task_name);
                        break;
                    }
                }
            }
        });
        info!("注册周期任务 {}，间隔 {}ms", name, every_n_millis);
        self.periodic_tasks.insert(name, handle);
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.periodic_tasks.len()
    }

    pub async fn shutdown(self) {
        // 发送关闭信号
        let _ = self.shutdown_sender.send(());

        // 等待所有任务完成
        for handle in self.periodic_tasks.into_values() {
            let _ = handle.await;
        }
    }
}
