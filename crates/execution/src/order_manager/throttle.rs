//! 下单限流: 任意 60 秒滑动窗口内最多 N 笔

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct OrderThrottle {
    limit: usize,
    window: Duration,
    recent: VecDeque<Instant>,
}

impl OrderThrottle {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit: limit as usize,
            window: Duration::from_secs(60),
            recent: VecDeque::new(),
        }
    }

    /// 占用一个名额，窗口已满返回 false
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) >= self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= self.limit {
            return false;
        }
        self.recent.push_back(now);
        true
    }

    pub fn in_window(&self) -> usize {
        self.recent.len()
    }
}
