//! 优化目标评分
//!
//! 三种目标共用同一组指标，只是权重不同。交易笔数不足时:
//! - 默认按缺口扣分 (每笔 0.35)
//! - 严格模式直接给出极差分数，保证排在任何达标候选之后

use dip_quant_domain::{CandidateSummary, Objective, RobustnessSummary, StrategyParameters};
use dip_quant_risk::GateRule;
use dip_quant_strategies::BacktestReport;

/// 严格模式下不达标候选的基准分
pub const GATED_SCORE: f64 = -1_000_000.0;

const TRADE_SHORTFALL_PENALTY: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveScore {
    pub score: f64,
    pub meets_min_trades: bool,
}

fn weighted(objective: Objective, sharpe: f64, ret: f64, win_rate: f64, drawdown: f64) -> f64 {
    match objective {
        Objective::Sharpe => sharpe * 110.0 + ret * 1.1 + win_rate * 0.12 - drawdown,
        Objective::Return => ret * 3.1 + sharpe * 30.0 + win_rate * 0.08 - drawdown * 0.7,
        Objective::Balanced => sharpe * 80.0 + ret * 1.8 + win_rate * 0.14 - drawdown * 0.9,
    }
}

/// 熔断拦截越多扣分越多
fn halt_penalty(report: &BacktestReport) -> f64 {
    let count = |rule: GateRule| report.risk_rejections.get(rule.as_str()).copied().unwrap_or(0) as f64;
    (count(GateRule::ConsecutiveLosses) + count(GateRule::Drawdown)) * 0.001
        + count(GateRule::DailyLossLimit) * 0.0005
}

/// 单次回测的目标分
pub fn score_report(
    report: &BacktestReport,
    objective: Objective,
    min_trades: usize,
    strict_min_trades: bool,
) -> ObjectiveScore {
    let drawdown = report.max_drawdown_pct.abs();
    let shortfall = min_trades.saturating_sub(report.total_trades);
    let meets_min_trades = shortfall == 0;

    if strict_min_trades && !meets_min_trades {
        return ObjectiveScore {
            score: GATED_SCORE - shortfall as f64 * 1000.0 - drawdown,
            meets_min_trades,
        };
    }
    let base = weighted(
        objective,
        report.sharpe,
        report.total_return_pct,
        report.win_rate_pct,
        drawdown,
    );
    let score = base - shortfall as f64 * TRADE_SHORTFALL_PENALTY - halt_penalty(report);
    ObjectiveScore {
        score: if score.is_finite() { score } else { GATED_SCORE },
        meets_min_trades,
    }
}

/// 一个候选参数的评估结果 (单次回测或情景集成)
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub meets_min_trades: bool,
    pub total_return_pct: f64,
    pub sharpe: f64,
    pub max_drawdown_pct: f64,
    pub trades: usize,
    pub robustness: Option<RobustnessSummary>,
}

impl Evaluation {
    pub fn from_report(
        report: &BacktestReport,
        objective: Objective,
        min_trades: usize,
        strict_min_trades: bool,
    ) -> Self {
        let ObjectiveScore {
            score,
            meets_min_trades,
        } = score_report(report, objective, min_trades, strict_min_trades);
        Self {
            score,
            meets_min_trades,
            total_return_pct: report.total_return_pct,
            sharpe: report.sharpe,
            max_drawdown_pct: report.max_drawdown_pct,
            trades: report.total_trades,
            robustness: None,
        }
    }

    pub fn into_candidate(self, parameters: StrategyParameters) -> CandidateSummary {
        CandidateSummary {
            parameters,
            score: self.score,
            total_return_pct: self.total_return_pct,
            sharpe: self.sharpe,
            max_drawdown_pct: self.max_drawdown_pct,
            trades: self.trades,
            robustness: self.robustness,
        }
    }
}
