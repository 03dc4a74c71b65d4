//! 百分比值对象

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PercentageError {
    #[error("百分比超出范围: {0} (允许范围: 0-100)")]
    OutOfRange(f64),

    #[error("百分比无效: {0}")]
    Invalid(String),
}

/// 百分比值对象
///
/// 业务规则:
/// - 范围: 0.0 - 100.0
/// - 用于回撤阈值、再投资比例、扩容比例等
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Percentage(f64);

impl Percentage {
    /// 创建百分比 (带验证)
    ///
    /// 参数: 0-100的值 (如 50.0 表示50%)
    pub fn new(value: f64) -> Result<Self, PercentageError> {
        if !value.is_finite() {
            return Err(PercentageError::Invalid("百分比必须是有限数".to_string()));
        }
        if !(0.0..=100.0).contains(&value) {
            return Err(PercentageError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(0.0)
    }

    /// 获取百分比值 (0-100)
    pub fn value(&self) -> f64 {
        self.0
    }

    /// 获取比率值 (0-1)
    pub fn as_ratio(&self) -> f64 {
        self.0 / 100.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    /// 计算百分比对应的金额
    pub fn of(&self, amount: f64) -> f64 {
        amount * self.as_ratio()
    }

    /// 严格大于阈值才算超限 (等于阈值不触发)
    pub fn is_exceeded_by(&self, observed_pct: f64) -> bool {
        observed_pct > self.0
    }
}

impl TryFrom<f64> for Percentage {
    type Error = PercentageError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percentage> for f64 {
    fn from(p: Percentage) -> f64 {
        p.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

impl PartialOrd for Percentage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_percentage() {
        let pct = Percentage::new(50.0).unwrap();
        assert_eq!(pct.value(), 50.0);
        assert_eq!(pct.as_ratio(), 0.5);
    }

    #[test]
    fn test_invalid_percentage() {
        assert!(Percentage::new(-10.0).is_err());
        assert!(Percentage::new(150.0).is_err());
        assert!(matches!(
            Percentage::new(f64::NAN),
            Err(PercentageError::Invalid(_))
        ));
    }

    #[test]
    fn test_exceeded_is_strict() {
        let pct = Percentage::new(10.0).unwrap();
        assert!(!pct.is_exceeded_by(10.0));
        assert!(pct.is_exceeded_by(10.1));
        assert!(!pct.is_exceeded_by(9.9));
    }

    #[test]
    fn test_serde_validates() {
        let ok: Percentage = serde_json::from_str("12.5").unwrap();
        assert_eq!(ok.value(), 12.5);
        assert!(serde_json::from_str::<Percentage>("120").is_err());
    }

    #[test]
    fn test_display() {
        let pct = Percentage::new(75.5).unwrap();
        assert_eq!(format!("{}", pct), "75.50%");
        assert!((pct.of(1000.0) - 755.0).abs() < 1e-9);
    }
}
