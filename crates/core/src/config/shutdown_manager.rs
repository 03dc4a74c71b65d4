use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// 关闭回调函数
pub type ShutdownHook =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// 关闭配置
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// 总超时时间
    pub total_timeout: Duration,
    /// 每个钩子的超时时间
    pub hook_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(30),
            hook_timeout: Duration::from_secs(10),
        }
    }
}

/// 优雅停止管理器
///
/// 按注册顺序执行回调；单个回调失败或超时只记录日志，不影响后续回调。
pub struct ShutdownManager {
    is_shutting_down: Arc<AtomicBool>,
    hooks: Arc<RwLock<Vec<(String, ShutdownHook)>>>,
    config: ShutdownConfig,
}

impl ShutdownManager {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            hooks: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    pub fn new_default() -> Self {
        Self::new(ShutdownConfig::default())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    /// 注册关闭回调
    pub async fn register_shutdown_hook<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let boxed: ShutdownHook = Box::new(move || Box::pin(hook()));
        self.hooks.write().await.push((name.clone(), boxed));
        info!("注册关闭回调: {}", name);
    }

    /// 执行优雅关闭，重复调用只执行一次
    pub async fn shutdown(&self) -> Result<()> {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("关闭已在进行中");
            return Ok(());
        }

        info!("开始执行优雅关闭，总超时: {:?}", self.config.total_timeout);
        let start = Instant::now();

        match tokio::time::timeout(self.config.total_timeout, self.execute_hooks()).await {
            Ok(()) => {
                info!("优雅关闭完成，耗时: {:?}", start.elapsed());
                Ok(())
            }
            Err(_) => {
                error!("关闭超时 ({:?})", self.config.total_timeout);
                Err(anyhow::anyhow!("关闭超时"))
            }
        }
    }

    async fn execute_hooks(&self) {
        let hooks = self.hooks.read().await;
        if hooks.is_empty() {
            info!("没有注册的关闭回调");
            return;
        }

        let total = hooks.len();
        for (index, (name, hook)) in hooks.iter().enumerate() {
            let hook_start = Instant::now();
            match tokio::time::timeout(self.config.hook_timeout, hook()).await {
                Ok(Ok(())) => info!(
                    "关闭回调 {}/{} [{}] 完成，耗时: {:?}",
                    index + 1,
                    total,
                    name,
                    hook_start.elapsed()
                ),
                Ok(Err(e)) => error!("关闭回调 {}/{} [{}] 失败: {}", index + 1, total, name, e),
                Err(_) => error!(
                    "关闭回调 {}/{} [{}] 超时 ({:?})",
                    index + 1,
                    total,
                    name,
                    self.config.hook_timeout
                ),
            }
        }
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            Ok(name)
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            Ok("CTRL+C")
        }
    }
}

/// 全局关闭管理器实例
static SHUTDOWN_MANAGER: once_cell::sync::OnceCell<ShutdownManager> =
    once_cell::sync::OnceCell::new();

/// 初始化全局关闭管理器
pub fn init_shutdown_manager(config: Option<ShutdownConfig>) -> &'static ShutdownManager {
    SHUTDOWN_MANAGER.get_or_init(|| ShutdownManager::new(config.unwrap_or_default()))
}
