use crate::stats::mean;

/// 最近 `period` 个值的简单移动平均，数据不足返回 `None`
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    mean(&values[values.len() - period..])
}

/// 收盘价低于均线的百分比 (正数表示在均线下方)
pub fn dip_below_pct(close: f64, average: f64) -> Option<f64> {
    if average <= 0.0 {
        return None;
    }
    Some((average - close) / average * 100.0)
}
