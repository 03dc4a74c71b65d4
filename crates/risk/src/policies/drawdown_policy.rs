//! 回撤控制策略

use dip_quant_domain::entities::EquityTrack;
use dip_quant_domain::Percentage;

/// 回撤控制策略
///
/// 当前权益低于峰值的幅度严格大于阈值时熔断；
/// 权益回升到阈值以内 (或人工重置峰值) 后自动恢复。
#[derive(Debug, Clone, Copy)]
pub struct DrawdownPolicy {
    pub max_drawdown: Percentage,
}

impl DrawdownPolicy {
    pub fn new(max_drawdown: Percentage) -> Self {
        Self { max_drawdown }
    }

    /// 由原始百分比构造，非法值按 0 处理 (即任何回撤都触发)
    pub fn from_pct(pct: f64) -> Self {
        Self::new(Percentage::new(pct).unwrap_or_else(|_| Percentage::zero()))
    }

    pub fn is_drawdown_exceeded(&self, current_drawdown_pct: f64) -> bool {
        self.max_drawdown.is_exceeded_by(current_drawdown_pct)
    }

    /// 超限时返回说明
    pub fn check(&self, track: &EquityTrack) -> Result<(), String> {
        let dd = track.drawdown_pct();
        if self.is_drawdown_exceeded(dd) {
            return Err(format!(
                "权益 {:.2} 较峰值 {:.2} 回撤 {:.2}%，超过阈值 {}",
                track.current, track.peak, dd, self.max_drawdown
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(peak: f64, current: f64) -> EquityTrack {
        let mut t = EquityTrack::new(peak);
        t.mark(current);
        t
    }

    #[test]
    fn test_threshold_is_strict() {
        let policy = DrawdownPolicy::from_pct(10.0);
        assert!(policy.check(&track(1000.0, 899.0)).is_err());
        assert!(policy.check(&track(1000.0, 901.0)).is_ok());
        assert!(policy.check(&track(1000.0, 900.0)).is_ok());
    }

    #[test]
    fn test_recovery_clears_breach() {
        let policy = DrawdownPolicy::from_pct(10.0);
        let mut t = track(1000.0, 850.0);
        assert!(policy.check(&t).is_err());
        t.mark(950.0);
        assert!(policy.check(&t).is_ok());
    }
}
