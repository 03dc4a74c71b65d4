//! 市场时钟
//!
//! 给定时间返回开盘/收盘状态，收盘时给出下一次开盘时间。
//! 日历不可用时一律按收盘处理，不做猜测。

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use dip_quant_domain::TradingCalendar;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 向后查找下一个交易日的最大天数
const DEFAULT_LOOKAHEAD_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Open {
        session_date: NaiveDate,
        closes_at: DateTime<Utc>,
    },
    Closed {
        next_open: Option<DateTime<Utc>>,
    },
    /// 日历不可用，按收盘处理
    Unavailable { reason: String },
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open { .. })
    }

    pub fn session_date(&self) -> Option<NaiveDate> {
        match self {
            SessionState::Open { session_date, .. } => Some(*session_date),
            _ => None,
        }
    }

    pub fn next_open(&self) -> Option<DateTime<Utc>> {
        match self {
            SessionState::Closed { next_open } => *next_open,
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct MarketClock {
    calendar: Arc<dyn TradingCalendar>,
    tz: Tz,
    lookahead_days: i64,
}

impl MarketClock {
    pub fn new(calendar: Arc<dyn TradingCalendar>, tz: Tz) -> Self {
        Self {
            calendar,
            tz,
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
        }
    }

    pub fn with_lookahead_days(mut self, days: i64) -> Self {
        self.lookahead_days = days.max(1);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// 交易所本地日期
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    pub async fn status_at(&self, now: DateTime<Utc>) -> SessionState {
        let today = self.local_date(now);
        let session = match self.calendar.session(today).await {
            Ok(s) => s,
            Err(e) => {
                warn!("交易日历不可用，按收盘处理: {}", e);
                return SessionState::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        if let Some(window) = session {
            if window.contains(now) {
                return SessionState::Open {
                    session_date: window.date,
                    closes_at: window.close,
                };
            }
            if now < window.open {
                return SessionState::Closed {
                    next_open: Some(window.open),
                };
            }
        }

        for offset in 1..=self.lookahead_days {
            let date = today + Duration::days(offset);
            match self.calendar.session(date).await {
                Ok(Some(window)) => {
                    return SessionState::Closed {
                        next_open: Some(window.open),
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!("查找下一个交易日失败: {}", e);
                    return SessionState::Closed { next_open: None };
                }
            }
        }
        SessionState::Closed { next_open: None }
    }

    pub async fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now).await.is_open()
    }
}
