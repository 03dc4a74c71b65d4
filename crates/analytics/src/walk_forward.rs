//! 前推验证
//!
//! 训练窗口始终从区间起点开始并逐折扩张，测试窗口紧随其后。
//! 每折在训练段上重新优化，再用样本外测试段打分。

use chrono::{Duration, NaiveDate};
use dip_quant_common::utils::days_between;
use dip_quant_domain::{FoldResult, WalkForwardSummary};
use serde::Serialize;
use tracing::info;

/// 训练段最短天数，不足的折跳过
pub const MIN_TRAIN_DAYS: i64 = 90;
/// 测试段最短天数
pub const MIN_TEST_DAYS: i64 = 20;
/// 样本外收益非负的折数占比达到该值才算通过
pub const PASS_RATE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FoldPlan {
    pub fold: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

pub fn plan_folds(start: NaiveDate, end: NaiveDate, folds: usize) -> Vec<FoldPlan> {
    if folds == 0 || end <= start {
        return Vec::new();
    }
    let total_days = days_between(start, end) + 1;
    let span = (total_days / (folds as i64 + 1)).max(MIN_TEST_DAYS);

    let mut plans = Vec::new();
    for idx in 1..=folds as i64 {
        let train_end = start + Duration::days(idx * span - 1);
        let test_start = train_end + Duration::days(1);
        if test_start > end {
            break;
        }
        let test_end = end.min(test_start + Duration::days(span - 1));
        if days_between(test_start, test_end) + 1 < MIN_TEST_DAYS {
            break;
        }
        if days_between(start, train_end) + 1 < MIN_TRAIN_DAYS {
            continue;
        }
        plans.push(FoldPlan {
            fold: idx as usize,
            train_start: start,
            train_end,
            test_start,
            test_end,
        });
    }
    plans
}

pub fn summarize(folds: Vec<FoldResult>) -> WalkForwardSummary {
    if folds.is_empty() {
        return WalkForwardSummary {
            folds,
            pass_rate: 0.0,
            avg_oos_score: 0.0,
            worst_fold_return_pct: 0.0,
            validated: false,
        };
    }
    let n = folds.len() as f64;
    let passed = folds.iter().filter(|f| f.oos_return_pct >= 0.0).count() as f64;
    let pass_rate = passed / n;
    WalkForwardSummary {
        pass_rate,
        avg_oos_score: folds.iter().map(|f| f.oos_score).sum::<f64>() / n,
        worst_fold_return_pct: folds
            .iter()
            .map(|f| f.oos_return_pct)
            .fold(f64::INFINITY, f64::min),
        validated: pass_rate >= PASS_RATE_THRESHOLD,
        folds,
    }
}

/// 依次执行每一折，`run_fold` 负责训练段优化与测试段评分
pub fn run_walk_forward<E, F>(plans: &[FoldPlan], mut run_fold: F) -> Result<WalkForwardSummary, E>
where
    F: FnMut(&FoldPlan) -> Result<FoldResult, E>,
{
    let mut results = Vec::with_capacity(plans.len());
    for plan in plans {
        let result = run_fold(plan)?;
        info!(
            "前推验证第 {} 折: 训练 {}~{}, 测试 {}~{}, 样本外收益 {:.2}%, 得分 {:.3}",
            plan.fold,
            plan.train_start,
            plan.train_end,
            plan.test_start,
            plan.test_end,
            result.oos_return_pct,
            result.oos_score
        );
        results.push(result);
    }
    Ok(summarize(results))
}
