use crate::stats::{mean, sample_std};

/// 最新值相对最近 `period` 个值的 Z-score
pub fn zscore(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let m = mean(window)?;
    let sd = sample_std(window)?;
    if sd <= f64::EPSILON {
        return Some(0.0);
    }
    let last = *window.last()?;
    Some((last - m) / sd)
}
