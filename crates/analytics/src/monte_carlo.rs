//! 蒙特卡洛情景集成
//!
//! 每个情景对同一份历史数据做随机扰动: 标的子集、手续费/滑点、回测窗口两端内缩、
//! 逐根K线的乘性高斯噪声。候选参数在全部情景上回测，取各情景得分的中位数。
//!
//! 情景在任务开始时生成一次，所有候选使用同一组情景，保证可比。

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use dip_quant_common::utils::days_between;
use dip_quant_common::Bar;
use dip_quant_domain::{Objective, RobustnessSummary, StrategyParameters};
use dip_quant_indicators::stats::percentile;
use dip_quant_strategies::{BacktestConfig, BacktestEngine};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Serialize;
use tracing::debug;

use crate::objective::Evaluation;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub p95: f64,
    pub p50: f64,
    pub p05: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

pub fn calculate_stats(values: &[f64]) -> Stats {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    if sorted.is_empty() {
        return Stats {
            p95: 0.0,
            p50: 0.0,
            p05: 0.0,
            mean: 0.0,
            min: 0.0,
            max: 0.0,
        };
    }
    let sum: f64 = sorted.iter().sum();
    Stats {
        p95: percentile(&sorted, 0.95).unwrap_or(0.0),
        p50: percentile(&sorted, 0.50).unwrap_or(0.0),
        p05: percentile(&sorted, 0.05).unwrap_or(0.0),
        mean: sum / sorted.len() as f64,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
    }
}

/// 一个扰动情景
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    pub index: usize,
    pub seed: u64,
    pub fee_bps: f64,
    pub slippage_bps: f64,
    /// 逐根K线价格噪声标准差 (基点)
    pub noise_bps: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub symbols: Vec<String>,
}

impl Scenario {
    /// 截到窗口末尾并叠加价格噪声，窗口起点之前的K线保留用于指标预热
    pub fn apply(&self, series: &BTreeMap<String, Vec<Bar>>) -> BTreeMap<String, Vec<Bar>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let sigma = self.noise_bps / 10_000.0;
        self.symbols
            .iter()
            .filter_map(|symbol| series.get(symbol).map(|bars| (symbol, bars)))
            .map(|(symbol, bars)| {
                let noisy = bars
                    .iter()
                    .filter(|b| b.date().map_or(false, |d| d <= self.end))
                    .map(|b| {
                        let z: f64 = rng.sample(StandardNormal);
                        b.scaled((1.0 + sigma * z).max(0.01))
                    })
                    .collect();
                (symbol.clone(), noisy)
            })
            .collect()
    }

    pub fn backtest_config(&self, base: &BacktestConfig) -> BacktestConfig {
        BacktestConfig {
            fee_bps: self.fee_bps,
            slippage_bps: self.slippage_bps,
            ..base.clone()
        }
    }
}

pub struct ScenarioGenerator {
    rng: StdRng,
    base_fee_bps: f64,
}

impl ScenarioGenerator {
    pub fn new(seed: u64, base_fee_bps: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_fee_bps,
        }
    }

    pub fn generate(
        &mut self,
        count: usize,
        universe: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<Scenario> {
        (0..count).map(|i| self.next(i, universe, start, end)).collect()
    }

    fn next(&mut self, index: usize, universe: &[String], start: NaiveDate, end: NaiveDate) -> Scenario {
        let max_trim = (days_between(start, end) / 12).max(0);
        let mut s = start + Duration::days(self.rng.gen_range(0..=max_trim));
        let mut e = end - Duration::days(self.rng.gen_range(0..=max_trim));
        if e <= s {
            s = start;
            e = end;
        }

        let keep = ((universe.len() as f64 * self.rng.gen_range(0.7f64..=1.0)).round() as usize)
            .clamp(1.min(universe.len()), universe.len());
        let chosen: Vec<&String> = universe.choose_multiple(&mut self.rng, keep).collect();
        // 保持原有顺序
        let symbols = universe
            .iter()
            .filter(|s| chosen.contains(s))
            .cloned()
            .collect();

        Scenario {
            index,
            seed: self.rng.gen(),
            fee_bps: (self.base_fee_bps + self.rng.gen_range(-1.5f64..=4.0)).max(0.0),
            slippage_bps: (5.0 + self.rng.gen_range(-2.0f64..=12.0)).clamp(1.0, 75.0),
            noise_bps: self.rng.gen_range(5.0f64..=20.0),
            start: s,
            end: e,
            symbols,
        }
    }
}

/// 多个情景评估结果的汇总: 得分取中位数
pub fn aggregate(evaluations: &[Evaluation]) -> Evaluation {
    let stats_of = |f: fn(&Evaluation) -> f64| {
        calculate_stats(&evaluations.iter().map(f).collect::<Vec<f64>>())
    };
    let scores = stats_of(|e: &Evaluation| e.score);
    let returns = stats_of(|e: &Evaluation| e.total_return_pct);
    let sharpes = stats_of(|e: &Evaluation| e.sharpe);
    let drawdowns = stats_of(|e: &Evaluation| e.max_drawdown_pct.abs());
    let trades = stats_of(|e: &Evaluation| e.trades as f64);

    let n = evaluations.len();
    let losses = evaluations.iter().filter(|e| e.total_return_pct < 0.0).count();
    let passing = evaluations.iter().filter(|e| e.meets_min_trades).count();

    Evaluation {
        score: if n == 0 { crate::objective::GATED_SCORE } else { scores.p50 },
        meets_min_trades: n > 0 && passing * 2 >= n,
        total_return_pct: returns.p50,
        sharpe: sharpes.p50,
        max_drawdown_pct: drawdowns.p95,
        trades: trades.p50.round() as usize,
        robustness: Some(RobustnessSummary {
            scenarios: n,
            median_sharpe: sharpes.p50,
            median_return_pct: returns.p50,
            p95_drawdown_pct: drawdowns.p95,
            loss_probability: if n > 0 { losses as f64 / n as f64 } else { 1.0 },
            median_trades: trades.p50,
        }),
    }
}

struct PreparedScenario {
    scenario: Scenario,
    engine: BacktestEngine,
    series: BTreeMap<String, Vec<Bar>>,
}

/// 情景集成评估器
pub struct EnsembleEvaluator {
    scenarios: Vec<PreparedScenario>,
}

impl EnsembleEvaluator {
    pub fn new(
        base: &BacktestConfig,
        series: &BTreeMap<String, Vec<Bar>>,
        scenarios: Vec<Scenario>,
    ) -> Self {
        let scenarios = scenarios
            .into_iter()
            .map(|scenario| {
                debug!(
                    "情景 {}: {} ~ {}, 标的 {}, 手续费 {:.2}bps, 滑点 {:.2}bps, 噪声 {:.1}bps",
                    scenario.index,
                    scenario.start,
                    scenario.end,
                    scenario.symbols.len(),
                    scenario.fee_bps,
                    scenario.slippage_bps,
                    scenario.noise_bps
                );
                PreparedScenario {
                    engine: BacktestEngine::new(scenario.backtest_config(base)),
                    series: scenario.apply(series),
                    scenario,
                }
            })
            .collect();
        Self { scenarios }
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn evaluate(
        &self,
        params: &StrategyParameters,
        objective: Objective,
        min_trades: usize,
        strict_min_trades: bool,
    ) -> Evaluation {
        let evaluations: Vec<Evaluation> = self
            .scenarios
            .iter()
            .map(|p| {
                let report = p.engine.run_from(params, &p.series, Some(p.scenario.start));
                Evaluation::from_report(&report, objective, min_trades, strict_min_trades)
            })
            .collect();
        aggregate(&evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn eval(score: f64, ret: f64, dd: f64, trades: usize) -> Evaluation {
        Evaluation {
            score,
            meets_min_trades: true,
            total_return_pct: ret,
            sharpe: 0.0,
            max_drawdown_pct: dd,
            trades,
            robustness: None,
        }
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_score_is_median_not_mean() {
        let odd = aggregate(&[
            eval(1.0, 1.0, 1.0, 3),
            eval(100.0, 2.0, 2.0, 4),
            eval(2.0, -1.0, 3.0, 5),
        ]);
        assert!(approx_eq!(f64, odd.score, 2.0, epsilon = 1e-12));

        let even = aggregate(&[eval(1.0, 1.0, 1.0, 3), eval(3.0, -2.0, 2.0, 4)]);
        assert!(approx_eq!(f64, even.score, 2.0, epsilon = 1e-12));

        let robust = odd.robustness.unwrap();
        assert_eq!(robust.scenarios, 3);
        assert!(approx_eq!(f64, robust.loss_probability, 1.0 / 3.0, epsilon = 1e-12));
        assert!(approx_eq!(f64, robust.median_trades, 4.0, epsilon = 1e-12));
        assert!(approx_eq!(f64, robust.p95_drawdown_pct, 2.9, epsilon = 1e-9));
    }

    #[test]
    fn test_calculate_stats() {
        let stats = calculate_stats(&[4.0, 1.0, 3.0, 2.0, f64::NAN]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!(approx_eq!(f64, stats.p50, 2.5, epsilon = 1e-12));
        assert!(approx_eq!(f64, stats.mean, 2.5, epsilon = 1e-12));
    }

    #[test]
    fn test_scenarios_stay_in_ranges() {
        let universe: Vec<String> = ["SPY", "QQQ", "IWM", "DIA"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (start, end) = (date(1, 1), date(12, 31));
        let scenarios = ScenarioGenerator::new(7, 5.0).generate(50, &universe, start, end);

        for s in &scenarios {
            assert!(s.start >= start && s.end <= end && s.start < s.end);
            assert!(days_between(start, s.start) <= 30);
            assert!(days_between(s.end, end) <= 30);
            assert!((5.0..=20.0).contains(&s.noise_bps));
            assert!((3.5..=9.0).contains(&s.fee_bps));
            assert!((3.0..=17.0).contains(&s.slippage_bps));
            assert!(s.symbols.len() >= 3 && s.symbols.len() <= 4);
        }

        let again = ScenarioGenerator::new(7, 5.0).generate(50, &universe, start, end);
        assert_eq!(scenarios, again);
    }

    #[test]
    fn test_apply_adds_noise_and_cuts_window() {
        let bars: Vec<Bar> = (0..10)
            .map(|i| {
                let ts = dip_quant_common::utils::date_to_ms(date(1, 1 + i));
                Bar::new(ts, 100.0, 101.0, 99.0, 100.0, 1.0)
            })
            .collect();
        let series = BTreeMap::from([("SPY".to_string(), bars)]);
        let scenario = Scenario {
            index: 0,
            seed: 1,
            fee_bps: 5.0,
            slippage_bps: 5.0,
            noise_bps: 20.0,
            start: date(1, 3),
            end: date(1, 8),
            symbols: vec!["SPY".into(), "QQQ".into()],
        };
        let applied = scenario.apply(&series);
        let spy = &applied["SPY"];
        assert_eq!(applied.len(), 1);
        assert_eq!(spy.len(), 8);
        assert!(spy.iter().any(|b| b.close != 100.0));
        assert!(spy.iter().all(|b| (b.close - 100.0).abs() < 2.0 && b.high >= b.close));
    }
}
