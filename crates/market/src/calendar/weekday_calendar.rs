//! 工作日交易日历
//!
//! 周一至周五按交易所本地时间开收盘，周末与配置的休市日无交易。
//! 夏令时切换由 `chrono-tz` 处理。

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use dip_quant_domain::{CalendarError, SessionWindow, TradingCalendar};

#[derive(Debug, Clone)]
pub struct WeekdayCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
    holidays: BTreeSet<NaiveDate>,
}

impl WeekdayCalendar {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            tz,
            open,
            close,
            holidays: BTreeSet::new(),
        }
    }

    /// 纽交所常规时段 09:30-16:00 (America/New_York)
    pub fn nyse() -> Self {
        Self::new(
            chrono_tz::America::New_York,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        )
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> Result<chrono::DateTime<Utc>, CalendarError> {
        self.tz
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| CalendarError::InvalidTime(format!("{} {}", date, time)))
    }
}

#[async_trait]
impl TradingCalendar for WeekdayCalendar {
    async fn session(&self, date: NaiveDate) -> Result<Option<SessionWindow>, CalendarError> {
        if !self.is_trading_day(date) {
            return Ok(None);
        }
        Ok(Some(SessionWindow {
            date,
            open: self.to_utc(date, self.open)?,
            close: self.to_utc(date, self.close)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_weekday_session_in_utc() {
        let cal = WeekdayCalendar::nyse();
        // 冬令时 EST = UTC-5
        let w = cal.session(day(2024, 1, 3)).await.unwrap().unwrap();
        assert_eq!(w.open, Utc.with_ymd_and_hms(2024, 1, 3, 14, 30, 0).unwrap());
        assert_eq!(w.close, Utc.with_ymd_and_hms(2024, 1, 3, 21, 0, 0).unwrap());
        // 夏令时 EDT = UTC-4
        let w = cal.session(day(2024, 7, 3)).await.unwrap().unwrap();
        assert_eq!(w.open, Utc.with_ymd_and_hms(2024, 7, 3, 13, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn test_weekend_and_holiday_closed() {
        let cal = WeekdayCalendar::nyse().with_holidays([day(2024, 7, 4)]);
        assert!(cal.session(day(2024, 1, 6)).await.unwrap().is_none());
        assert!(cal.session(day(2024, 7, 4)).await.unwrap().is_none());
        assert!(cal.session(day(2024, 7, 5)).await.unwrap().is_some());
    }
}
