//! 券商调用的超时与重试
//!
//! 单次调用受 `timeout` 限制，超时视为瞬时错误。
//! 只有 `AppError::BrokerTransient` 会按指数退避 (带抖动) 重试，最多 `max_retries` 次。

use std::future::Future;
use std::time::Duration;

use dip_quant_common::AppError;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: usize,
    /// 首次重试的基础等待
    pub base_delay_ms: u64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_delay_ms: 100,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: usize) -> Self {
        Self {
            timeout,
            max_retries,
            ..Default::default()
        }
    }

    /// 不重试，仅保留超时
    pub fn no_retry(timeout: Duration) -> Self {
        Self::new(timeout, 0)
    }
}

pub async fn with_timeout_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    // from_millis(2) 每次翻倍，factor 把单位换成 base_delay_ms
    let strategy = ExponentialBackoff::from_millis(2)
        .factor((policy.base_delay_ms / 2).max(1))
        .max_delay(policy.max_delay)
        .map(jitter)
        .take(policy.max_retries);

    let limit = policy.timeout;
    let action = || {
        let fut = op();
        let label = label.to_string();
        async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(AppError::BrokerTransient(format!(
                    "{} 超时 ({}s)",
                    label,
                    limit.as_secs_f64()
                ))),
            }
        }
    };

    RetryIf::spawn(strategy, action, |e: &AppError| {
        let retry = e.is_transient();
        if retry {
            warn!("{} 失败，准备重试: {}", label, e);
        }
        retry
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries: 2,
            base_delay_ms: 2,
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<u32, AppError> = with_timeout_retry(&fast(), "poll", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AppError::BrokerTransient("429".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<u32, AppError> = with_timeout_retry(&fast(), "poll", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::BrokerTransient("503".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(AppError::BrokerTransient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<u32, AppError> = with_timeout_retry(&fast(), "poll", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::BrokerFatal("401".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(AppError::BrokerFatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let result: Result<u32, AppError> =
            with_timeout_retry(&RetryPolicy::no_retry(Duration::from_millis(10)), "slow", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(AppError::BrokerTransient(_))));
    }
}
