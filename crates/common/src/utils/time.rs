use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

/// 一天的毫秒数
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// 日期零点 (UTC) 的毫秒时间戳
pub fn date_to_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// 毫秒时间戳转日期 (UTC)
pub fn ms_to_date(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ts).map(|dt| dt.date_naive())
}

/// 所在周的周一
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as i64;
    date - Duration::days(offset)
}

/// 两个日期之间的天数 (end - start)
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

/// 持有天数，按自然日计
pub fn held_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_start_is_monday() {
        // 2024-01-04 周四
        let thu = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        assert_eq!(week_start(thu), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        // 周一本身
        let mon = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(week_start(mon), mon);
        // 周日归属上一周
        let sun = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        assert_eq!(week_start(sun), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_date_ms_roundtrip() {
        let d = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
        assert_eq!(ms_to_date(date_to_ms(d)), Some(d));
        assert_eq!(date_to_ms(d + Duration::days(1)) - date_to_ms(d), DAY_MS);
    }
}
