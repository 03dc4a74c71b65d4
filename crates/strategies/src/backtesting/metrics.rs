//! 回测性能指标

use dip_quant_indicators::stats::{mean, sample_std};

/// 日收益序列 (相邻权益点的简单收益)
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// 夏普比率，样本标准差 (n-1)，按 `sqrt(annualization)` 年化
pub fn calculate_sharpe_ratio(returns: &[f64], annualization: f64) -> f64 {
    let (Some(m), Some(sd)) = (mean(returns), sample_std(returns)) else {
        return 0.0;
    };
    if sd <= f64::EPSILON {
        return 0.0;
    }
    m / sd * annualization.sqrt()
}

/// 索提诺比率
///
/// 下行偏差 = sqrt(sum(min(r, 0)^2) / n)，n 为全部观测数。
pub fn calculate_sortino_ratio(returns: &[f64], annualization: f64) -> f64 {
    let Some(m) = mean(returns) else {
        return 0.0;
    };
    let n = returns.len() as f64;
    let downside = returns
        .iter()
        .map(|r| r.min(0.0).powi(2))
        .sum::<f64>()
        / n;
    let dd = downside.sqrt();
    if dd <= f64::EPSILON {
        return 0.0;
    }
    m / dd * annualization.sqrt()
}

/// 最大回撤 (百分比)
pub fn calculate_max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };

    let mut max_drawdown = 0.0;
    let mut peak = first;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let drawdown = (peak - equity) / peak * 100.0;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }
    max_drawdown
}

/// 胜率 (百分比)，盈亏为 0 不算盈利
pub fn calculate_win_rate(pnls: &[f64]) -> f64 {
    if pnls.is_empty() {
        return 0.0;
    }
    let wins = pnls.iter().filter(|p| **p > 0.0).count();
    wins as f64 / pnls.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_sharpe_uses_sample_std() {
        // 均值 0.02，样本标准差 0.01 (总体标准差会得到 2.449)
        let r = [0.01, 0.02, 0.03];
        assert!(approx_eq!(f64, calculate_sharpe_ratio(&r, 1.0), 2.0, epsilon = 1e-9));
        assert!(approx_eq!(
            f64,
            calculate_sharpe_ratio(&r, 252.0),
            2.0 * 252f64.sqrt(),
            epsilon = 1e-9
        ));
    }

    #[test]
    fn test_sortino_divides_by_total_count() {
        // 下行平方和 0.0005，除以 n=4 -> 偏差 0.01118
        // 若只除以负收益个数 2 会得到 0.316
        let r = [0.02, -0.01, 0.03, -0.02];
        let expected = 0.005 / (0.0005f64 / 4.0).sqrt();
        assert!(approx_eq!(f64, calculate_sortino_ratio(&r, 1.0), expected, epsilon = 1e-9));
        assert!(approx_eq!(f64, expected, 0.4472135955, epsilon = 1e-6));
    }

    #[test]
    fn test_degenerate_series() {
        assert_eq!(calculate_sharpe_ratio(&[0.01], 252.0), 0.0);
        assert_eq!(calculate_sharpe_ratio(&[0.01, 0.01], 252.0), 0.0);
        assert_eq!(calculate_sortino_ratio(&[0.01, 0.02], 252.0), 0.0);
        assert_eq!(calculate_sortino_ratio(&[], 252.0), 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let curve = [100.0, 120.0, 90.0, 130.0, 117.0];
        assert!(approx_eq!(f64, calculate_max_drawdown(&curve), 25.0, epsilon = 1e-9));
        assert_eq!(calculate_max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_win_rate_and_returns() {
        assert_eq!(calculate_win_rate(&[1.0, -1.0, 0.0, 2.0]), 50.0);
        let r = period_returns(&[100.0, 110.0, 99.0]);
        assert!(approx_eq!(f64, r[0], 0.1, epsilon = 1e-12));
        assert!(approx_eq!(f64, r[1], -0.1, epsilon = 1e-12));
    }
}
