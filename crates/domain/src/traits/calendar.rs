//! 交易日历接口

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalendarError {
    #[error("交易日历不可用: {0}")]
    Unavailable(String),

    #[error("无法换算交易时间: {0}")]
    InvalidTime(String),
}

/// 一个交易时段 (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

impl SessionWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.open && ts < self.close
    }
}

#[async_trait]
pub trait TradingCalendar: Send + Sync {
    /// 指定交易所本地日期的交易时段，休市返回 `None`
    async fn session(&self, date: NaiveDate) -> Result<Option<SessionWindow>, CalendarError>;
}
