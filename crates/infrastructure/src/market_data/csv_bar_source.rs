//! CSV 日线数据源
//!
//! 每个标的一个文件 `<dir>/<SYMBOL>.csv`，表头不区分大小写:
//! `date|timestamp|ts|time, open, high, low, close[, volume]`。
//! 时间列支持毫秒/秒时间戳、`YYYY-MM-DD` 与 RFC3339。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use dip_quant_common::utils::date_to_ms;
use dip_quant_common::{AppError, Bar};
use dip_quant_domain::BarSource;
use tracing::{debug, warn};

const TIME_COLUMNS: [&str; 5] = ["date", "timestamp", "ts", "time", "t"];

pub struct CsvBarSource {
    dir: PathBuf,
}

impl CsvBarSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol.to_uppercase()))
    }
}

/// 解析时间列为毫秒时间戳
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        // 小于 1e11 视为秒
        return Some(if n.abs() < 100_000_000_000 { n * 1000 } else { n });
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date_to_ms(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// 从 CSV 文本读取K线，按时间升序去重
pub fn parse_bars(reader: impl std::io::Read, origin: &Path) -> Result<Vec<Bar>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| AppError::Parse(format!("{}: {}", origin.display(), e)))?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();
    let col = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));
    let missing = |name: &str| AppError::Parse(format!("{} 缺少列 {}", origin.display(), name));

    let t = col(&TIME_COLUMNS).ok_or_else(|| missing("date"))?;
    let o = col(&["open", "o"]).ok_or_else(|| missing("open"))?;
    let h = col(&["high", "h"]).ok_or_else(|| missing("high"))?;
    let l = col(&["low", "l"]).ok_or_else(|| missing("low"))?;
    let c = col(&["close", "c", "adj_close"]).ok_or_else(|| missing("close"))?;
    let v = col(&["volume", "v", "vol"]);

    let mut bars = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| AppError::Parse(format!("{}: {}", origin.display(), e)))?;
        let num = |idx: usize| record.get(idx).and_then(|s| s.parse::<f64>().ok());
        let ts = record.get(t).and_then(parse_timestamp);
        match (ts, num(o), num(h), num(l), num(c)) {
            (Some(ts), Some(open), Some(high), Some(low), Some(close)) => {
                let volume = v.and_then(num).unwrap_or(0.0);
                bars.push(Bar::new(ts, open, high, low, close, volume));
            }
            _ => warn!("{} 第 {} 行无法解析，已跳过", origin.display(), line + 2),
        }
    }
    bars.sort_by_key(|b| b.ts);
    bars.dedup_by_key(|b| b.ts);
    Ok(bars)
}

#[async_trait]
impl BarSource for CsvBarSource {
    async fn load_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, AppError> {
        let path = self.file_for(symbol);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            AppError::Storage(format!("读取行情文件失败 {}: {}", path.display(), e))
        })?;
        let bars = parse_bars(bytes.as_slice(), &path)?;
        let bars: Vec<Bar> = bars
            .into_iter()
            .filter(|b| match b.date() {
                Some(d) => start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e),
                None => false,
            })
            .collect();
        debug!("{} 载入 {} 根日线", symbol, bars.len());
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "Date,Open,High,Low,Close,Volume\n\
        2024-01-03,101,102,100,101.5,1000\n\
        2024-01-02,100,101,99,100.5,900\n\
        2024-01-03,101,102,100,101.5,1000\n\
        bad-row,1,1,1,1,1\n\
        2024-01-04,102,103,101,102.5,\n";

    #[test]
    fn test_parse_sorts_and_dedupes() {
        let bars = parse_bars(CSV.as_bytes(), Path::new("SPY.csv")).unwrap();
        assert_eq!(bars.len(), 3);
        assert!(bars.windows(2).all(|w| w[0].ts < w[1].ts));
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(bars[2].volume, 0.0);
    }

    #[test]
    fn test_timestamp_formats() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let ms = date_to_ms(day);
        assert_eq!(parse_timestamp("2024-01-02"), Some(ms));
        assert_eq!(parse_timestamp(&(ms / 1000).to_string()), Some(ms));
        assert_eq!(parse_timestamp(&ms.to_string()), Some(ms));
        assert_eq!(parse_timestamp("2024-01-02T00:00:00Z"), Some(ms));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_missing_close_column() {
        let err = parse_bars("date,open,high,low\n".as_bytes(), Path::new("X.csv")).unwrap_err();
        assert!(err.to_string().contains("close"));
    }

    #[tokio::test]
    async fn test_load_filters_range() {
        let dir = std::env::temp_dir().join(format!("dip-quant-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("SPY.csv"), CSV).await.unwrap();

        let source = CsvBarSource::new(&dir);
        let start = NaiveDate::from_ymd_opt(2024, 1, 3);
        let bars = source.load_bars("spy", start, None).await.unwrap();
        assert_eq!(bars.len(), 2);

        assert!(matches!(
            source.load_bars("QQQ", None, None).await,
            Err(AppError::Storage(_))
        ));
    }
}
