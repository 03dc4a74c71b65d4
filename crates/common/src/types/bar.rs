use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV K线，`ts` 为毫秒时间戳 (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts)
    }

    /// K线所属日期 (UTC)
    pub fn date(&self) -> Option<NaiveDate> {
        self.datetime().map(|dt| dt.date_naive())
    }

    /// 对 OHLC 乘以同一系数，并保证 high/low 仍然包住开收盘
    pub fn scaled(&self, factor: f64) -> Self {
        let open = self.open * factor;
        let close = self.close * factor;
        let high = (self.high * factor).max(open).max(close);
        let low = (self.low * factor).min(open).min(close);
        Self {
            ts: self.ts,
            open,
            high,
            low,
            close,
            volume: self.volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_keeps_range_consistent() {
        let bar = Bar::new(0, 100.0, 101.0, 99.0, 100.5, 10.0);
        let scaled = bar.scaled(1.01);
        assert!(scaled.high >= scaled.open && scaled.high >= scaled.close);
        assert!(scaled.low <= scaled.open && scaled.low <= scaled.close);
        assert_eq!(scaled.volume, 10.0);
    }

    #[test]
    fn test_date() {
        // 2024-01-02 00:00:00 UTC
        let bar = Bar::new(1_704_153_600_000, 1.0, 1.0, 1.0, 1.0, 0.0);
        assert_eq!(bar.date(), NaiveDate::from_ymd_opt(2024, 1, 2));
    }
}
