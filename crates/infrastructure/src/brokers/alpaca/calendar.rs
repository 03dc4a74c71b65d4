//! Alpaca 交易日历 (/v2/calendar)，按日期缓存

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use dip_quant_domain::{CalendarError, SessionWindow, TradingCalendar};
use reqwest::Method;

use super::client::AlpacaClient;
use super::dto::CalendarDayDto;

pub struct AlpacaCalendar {
    client: Arc<AlpacaClient>,
    tz: Tz,
    cache: DashMap<NaiveDate, Option<SessionWindow>>,
}

impl AlpacaCalendar {
    pub fn new(client: Arc<AlpacaClient>) -> Self {
        Self {
            client,
            tz: chrono_tz::America::New_York,
            cache: DashMap::new(),
        }
    }
}

/// 把接口返回的本地日期与 "HH:MM" 换算为 UTC 交易时段
pub fn to_session(tz: Tz, day: &CalendarDayDto) -> Result<SessionWindow, CalendarError> {
    let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d")
        .map_err(|e| CalendarError::InvalidTime(format!("{}: {}", day.date, e)))?;
    let at = |hm: &str| {
        let time = NaiveTime::parse_from_str(hm, "%H:%M")
            .map_err(|e| CalendarError::InvalidTime(format!("{}: {}", hm, e)))?;
        tz.from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| CalendarError::InvalidTime(format!("{} {}", date, hm)))
    };
    Ok(SessionWindow {
        date,
        open: at(&day.open)?,
        close: at(&day.close)?,
    })
}

#[async_trait]
impl TradingCalendar for AlpacaCalendar {
    async fn session(&self, date: NaiveDate) -> Result<Option<SessionWindow>, CalendarError> {
        if let Some(hit) = self.cache.get(&date) {
            return Ok(*hit);
        }
        let day = date.format("%Y-%m-%d").to_string();
        let days: Vec<CalendarDayDto> = self
            .client
            .trading(
                Method::GET,
                "/v2/calendar",
                &[("start", day.clone()), ("end", day)],
                None,
            )
            .await
            .map_err(|e| CalendarError::Unavailable(e.to_string()))?;

        let window = match days.iter().find(|d| d.date == date.format("%Y-%m-%d").to_string()) {
            Some(d) => Some(to_session(self.tz, d)?),
            None => None,
        };
        self.cache.insert(date, window);
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_session_handles_early_close() {
        let day = CalendarDayDto {
            date: "2024-11-29".into(),
            open: "09:30".into(),
            close: "13:00".into(),
        };
        let w = to_session(chrono_tz::America::New_York, &day).unwrap();
        assert_eq!(w.open, Utc.with_ymd_and_hms(2024, 11, 29, 14, 30, 0).unwrap());
        assert_eq!(w.close, Utc.with_ymd_and_hms(2024, 11, 29, 18, 0, 0).unwrap());
    }
}
