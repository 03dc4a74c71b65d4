//! 参数优化器
//!
//! 第 0 个候选总是当前配置。之后按搜索方式产生候选:
//! - Bayesian: TPE 采样器，从历史试验中学习
//! - Random: 在当前最优参数附近随机变异
//!
//! 迭代次数不少于 `MIN_BAYESIAN_ITERATIONS` 且未开启情景集成时才使用 TPE，
//! 否则退回随机变异。开启前推验证时，每折在训练段上重新优化 (单次回测评估)。

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use chrono::NaiveDate;
use dip_quant_common::Bar;
use dip_quant_domain::{
    CandidateSummary, FoldResult, JobProgress, OptimizationRequest, SearchMethod,
    StrategyParameters, WalkForwardSummary,
};
use dip_quant_strategies::backtesting::slice_by_date;
use dip_quant_strategies::{BacktestConfig, BacktestEngine};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::info;

use crate::monte_carlo::{EnsembleEvaluator, ScenarioGenerator};
use crate::mutation::mutate_parameters;
use crate::objective::Evaluation;
use crate::tpe::TpeSampler;
use crate::walk_forward::{plan_folds, run_walk_forward, FoldPlan};

pub const MIN_BAYESIAN_ITERATIONS: usize = 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("没有可用的历史数据")]
    NoData,

    #[error("优化区间无效: {0}")]
    InvalidWindow(String),

    #[error("优化已取消")]
    Cancelled,
}

/// 实际采用的搜索方式
pub fn resolve_method(requested: SearchMethod, iterations: usize, ensemble: bool) -> SearchMethod {
    match requested {
        SearchMethod::Random => SearchMethod::Random,
        SearchMethod::Auto | SearchMethod::Bayesian => {
            if iterations >= MIN_BAYESIAN_ITERATIONS && !ensemble {
                SearchMethod::Bayesian
            } else {
                SearchMethod::Random
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    pub method: SearchMethod,
    pub best: CandidateSummary,
    pub evaluated: usize,
    pub walk_forward: Option<WalkForwardSummary>,
}

impl OptimizerOutcome {
    /// 前推验证至少跑完一折且通过率达标
    pub fn validated(&self) -> bool {
        self.walk_forward
            .as_ref()
            .map_or(false, |w| !w.folds.is_empty() && w.validated)
    }
}

/// 进度回调，返回 `Break` 表示取消
pub type ProgressFn<'a> = dyn FnMut(JobProgress, &CandidateSummary) -> ControlFlow<()> + 'a;

struct Tracker<'p, 'a> {
    progress: JobProgress,
    callback: &'p mut ProgressFn<'a>,
}

impl Tracker<'_, '_> {
    fn tick(&mut self, best: &CandidateSummary) -> Result<(), OptimizerError> {
        self.progress.completed += 1;
        match (self.callback)(self.progress, best) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(()) => Err(OptimizerError::Cancelled),
        }
    }
}

enum Evaluator {
    Single {
        engine: BacktestEngine,
        series: BTreeMap<String, Vec<Bar>>,
        start: NaiveDate,
    },
    Ensemble(EnsembleEvaluator),
}

impl Evaluator {
    /// 截到 `end` 为止，`start` 之前的K线只用于预热
    fn single(
        config: &BacktestConfig,
        series: &BTreeMap<String, Vec<Bar>>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Evaluator::Single {
            engine: BacktestEngine::new(config.clone()),
            series: series
                .iter()
                .map(|(symbol, bars)| (symbol.clone(), slice_by_date(bars, None, Some(end))))
                .collect(),
            start,
        }
    }

    fn evaluate(&self, params: &StrategyParameters, request: &OptimizationRequest) -> Evaluation {
        match self {
            Evaluator::Single {
                engine,
                series,
                start,
            } => {
                let report = engine.run_from(params, series, Some(*start));
                Evaluation::from_report(
                    &report,
                    request.objective,
                    request.min_trades,
                    request.strict_min_trades,
                )
            }
            Evaluator::Ensemble(ensemble) => ensemble.evaluate(
                params,
                request.objective,
                request.min_trades,
                request.strict_min_trades,
            ),
        }
    }
}

pub struct Optimizer<'a> {
    request: &'a OptimizationRequest,
    base: StrategyParameters,
    config: BacktestConfig,
    series: &'a BTreeMap<String, Vec<Bar>>,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        request: &'a OptimizationRequest,
        base: StrategyParameters,
        config: BacktestConfig,
        series: &'a BTreeMap<String, Vec<Bar>>,
    ) -> Self {
        Self {
            request,
            base,
            config,
            series,
        }
    }

    pub fn method(&self) -> SearchMethod {
        resolve_method(
            self.request.method,
            self.request.iterations,
            self.request.ensemble,
        )
    }

    fn iterations(&self) -> usize {
        self.request.iterations.max(1)
    }

    /// 优化区间: 请求区间与数据覆盖范围的交集
    pub fn window(&self) -> Result<(NaiveDate, NaiveDate), OptimizerError> {
        let firsts = self.series.values().filter_map(|b| b.first().and_then(|b| b.date()));
        let lasts = self.series.values().filter_map(|b| b.last().and_then(|b| b.date()));
        let (Some(data_start), Some(data_end)) = (firsts.min(), lasts.max()) else {
            return Err(OptimizerError::NoData);
        };
        let start = self.request.start.map_or(data_start, |s| s.max(data_start));
        let end = self.request.end.map_or(data_end, |e| e.min(data_end));
        if end <= start {
            return Err(OptimizerError::InvalidWindow(format!("{} ~ {}", start, end)));
        }
        Ok((start, end))
    }

    pub fn plan(&self) -> Result<Vec<FoldPlan>, OptimizerError> {
        let (start, end) = self.window()?;
        Ok(plan_folds(start, end, self.request.walk_forward_folds))
    }

    /// 总评估次数: 主搜索 + 每折重新优化
    pub fn total_steps(&self) -> Result<usize, OptimizerError> {
        Ok(self.iterations() * (1 + self.plan()?.len()))
    }

    pub fn run(&self, progress: &mut ProgressFn<'_>) -> Result<OptimizerOutcome, OptimizerError> {
        let (start, end) = self.window()?;
        let plans = plan_folds(start, end, self.request.walk_forward_folds);
        let seed = self.request.seed.unwrap_or_else(rand::random::<u64>);
        let method = self.method();
        let mut tracker = Tracker {
            progress: JobProgress {
                completed: 0,
                total: self.iterations() * (1 + plans.len()),
            },
            callback: progress,
        };

        let evaluator = if self.request.ensemble {
            let universe: Vec<String> = self.series.keys().cloned().collect();
            let scenarios = ScenarioGenerator::new(seed ^ 0x5eed, self.config.fee_bps).generate(
                self.request.scenarios.max(2),
                &universe,
                start,
                end,
            );
            Evaluator::Ensemble(EnsembleEvaluator::new(&self.config, self.series, scenarios))
        } else {
            Evaluator::single(&self.config, self.series, start, end)
        };

        info!(
            "开始优化 {}: {:?} x{}, 区间 {} ~ {}, 集成={}, 前推折数={}",
            self.request.strategy_id,
            method,
            self.iterations(),
            start,
            end,
            self.request.ensemble,
            plans.len()
        );
        let best = self.search(&evaluator, method, seed, &mut tracker)?;
        info!(
            "优化完成 {}: 最优得分 {:.3}, 收益 {:.2}%, 夏普 {:.2}, 交易 {}",
            self.request.strategy_id, best.score, best.total_return_pct, best.sharpe, best.trades
        );

        let walk_forward = if plans.is_empty() {
            None
        } else {
            let fold_method = resolve_method(self.request.method, self.request.iterations, false);
            let summary = run_walk_forward(&plans, |plan| {
                self.run_fold(plan, fold_method, seed, &mut tracker)
            })?;
            Some(summary)
        };

        Ok(OptimizerOutcome {
            method,
            best,
            evaluated: tracker.progress.completed,
            walk_forward,
        })
    }

    fn run_fold(
        &self,
        plan: &FoldPlan,
        method: SearchMethod,
        seed: u64,
        tracker: &mut Tracker<'_, '_>,
    ) -> Result<FoldResult, OptimizerError> {
        let train = Evaluator::single(&self.config, self.series, plan.train_start, plan.train_end);
        let fold_seed = seed.wrapping_add(plan.fold as u64);
        let best = self.search(&train, method, fold_seed, tracker)?;

        let test = Evaluator::single(&self.config, self.series, plan.test_start, plan.test_end);
        let oos = test.evaluate(&best.parameters, self.request);
        Ok(FoldResult {
            fold: plan.fold,
            train_start: plan.train_start,
            train_end: plan.train_end,
            test_start: plan.test_start,
            test_end: plan.test_end,
            in_sample_score: best.score,
            parameters: best.parameters,
            oos_score: oos.score,
            oos_return_pct: oos.total_return_pct,
            oos_sharpe: oos.sharpe,
            oos_trades: oos.trades,
        })
    }

    fn search(
        &self,
        evaluator: &Evaluator,
        method: SearchMethod,
        seed: u64,
        tracker: &mut Tracker<'_, '_>,
    ) -> Result<CandidateSummary, OptimizerError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tpe = TpeSampler::new(seed.wrapping_add(1));
        let mut trials: Vec<(StrategyParameters, f64)> = Vec::with_capacity(self.iterations());
        let mut best: Option<CandidateSummary> = None;

        for i in 0..self.iterations() {
            let params = match (i, method, best.as_ref()) {
                (0, _, _) | (_, _, None) => self.base.normalized(),
                (_, SearchMethod::Bayesian, _) => tpe.suggest(&trials),
                (_, _, Some(b)) => mutate_parameters(&b.parameters, &mut rng),
            };
            let evaluation = evaluator.evaluate(&params, self.request);
            trials.push((params.clone(), evaluation.score));

            let candidate = evaluation.into_candidate(params);
            if best.as_ref().map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
            if let Some(b) = best.as_ref() {
                tracker.tick(b)?;
            }
        }
        best.ok_or(OptimizerError::NoData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dip_quant_common::utils::date_to_ms;

    /// 震荡行情，每 23 天出现一次急跌
    fn dip_series(days: i64) -> BTreeMap<String, Vec<Bar>> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let bars = (0..days)
            .map(|i| {
                let base = 100.0 + 3.0 * (i as f64 / 9.0).sin();
                let close = if i % 23 == 22 { base * 0.95 } else { base };
                let ts = date_to_ms(start + chrono::Duration::days(i));
                Bar::new(ts, close, close * 1.01, close * 0.99, close, 1_000.0)
            })
            .collect();
        BTreeMap::from([("SPY".to_string(), bars)])
    }

    fn request(iterations: usize) -> OptimizationRequest {
        OptimizationRequest {
            iterations,
            seed: Some(17),
            min_trades: 1,
            ..OptimizationRequest::new("dip-spy")
        }
    }

    fn optimizer_for<'a>(
        req: &'a OptimizationRequest,
        series: &'a BTreeMap<String, Vec<Bar>>,
    ) -> Optimizer<'a> {
        Optimizer::new(req, StrategyParameters::default(), BacktestConfig::default(), series)
    }

    fn collect(
        optimizer: &Optimizer<'_>,
    ) -> (Result<OptimizerOutcome, OptimizerError>, Vec<JobProgress>) {
        let mut seen = Vec::new();
        let result = optimizer.run(&mut |p: JobProgress, _: &CandidateSummary| {
            seen.push(p);
            ControlFlow::Continue(())
        });
        (result, seen)
    }

    #[test]
    fn test_resolve_method() {
        use SearchMethod::*;
        assert_eq!(resolve_method(Auto, 20, false), Bayesian);
        assert_eq!(resolve_method(Auto, 19, false), Random);
        assert_eq!(resolve_method(Bayesian, 40, true), Random);
        assert_eq!(resolve_method(Random, 100, false), Random);
    }

    #[test]
    fn test_random_search_reports_progress() {
        let series = dip_series(200);
        let req = request(6);
        let optimizer = optimizer_for(&req, &series);
        let (result, seen) = collect(&optimizer);
        let outcome = result.unwrap();

        assert_eq!(outcome.method, SearchMethod::Random);
        assert_eq!(outcome.evaluated, 6);
        assert_eq!(seen.len(), 6);
        assert!(seen.iter().all(|p| p.total == 6));
        assert_eq!(seen.last().map(|p| p.completed), Some(6));
        assert!(outcome.best.parameters.validate().is_ok());
        assert!(outcome.walk_forward.is_none());
        assert!(!outcome.validated());
    }

    #[test]
    fn test_cancel_stops_between_candidates() {
        let series = dip_series(120);
        let req = request(10);
        let optimizer = optimizer_for(&req, &series);
        let mut calls = 0;
        let result = optimizer.run(&mut |_: JobProgress, _: &CandidateSummary| {
            calls += 1;
            if calls >= 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(result, Err(OptimizerError::Cancelled));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_ensemble_reports_robustness() {
        let series = dip_series(150);
        let req = OptimizationRequest {
            ensemble: true,
            scenarios: 3,
            method: SearchMethod::Bayesian,
            ..request(3)
        };
        let optimizer = optimizer_for(&req, &series);
        let outcome = collect(&optimizer).0.unwrap();
        assert_eq!(outcome.method, SearchMethod::Random);
        let robustness = outcome.best.robustness.unwrap();
        assert_eq!(robustness.scenarios, 3);
    }

    #[test]
    fn test_walk_forward_reoptimizes_each_fold() {
        let series = dip_series(400);
        let req = OptimizationRequest {
            walk_forward_folds: 3,
            ..request(2)
        };
        let optimizer = optimizer_for(&req, &series);
        let folds = optimizer.plan().unwrap().len();
        assert!(folds >= 2);
        assert_eq!(optimizer.total_steps().unwrap(), 2 * (1 + folds));

        let (result, seen) = collect(&optimizer);
        let outcome = result.unwrap();
        let wf = outcome.walk_forward.as_ref().unwrap();
        assert_eq!(wf.folds.len(), folds);
        assert_eq!(seen.len(), 2 * (1 + folds));
        assert_eq!(outcome.validated(), wf.validated);
        for fold in &wf.folds {
            assert!(fold.test_start > fold.train_end);
        }
    }

    #[test]
    fn test_empty_series_is_no_data() {
        let series = BTreeMap::new();
        let req = request(3);
        let optimizer = optimizer_for(&req, &series);
        assert_eq!(collect(&optimizer).0, Err(OptimizerError::NoData));

        let series = dip_series(50);
        let req = OptimizationRequest {
            start: NaiveDate::from_ymd_opt(2030, 1, 1),
            ..request(3)
        };
        let optimizer = optimizer_for(&req, &series);
        assert!(matches!(optimizer.window(), Err(OptimizerError::InvalidWindow(_))));
    }
}
