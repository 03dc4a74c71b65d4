//! Tree-structured Parzen Estimator 采样器
//!
//! 历史试验按得分分为前 γ 的"好"组和其余"差"组，每个参数在归一化的 [0, 1]
//! 区间上分别用高斯核估计两组密度 l(x)、g(x)。从 l(x) 抽取若干候选，
//! 取 l(x)/g(x) 最大者。各参数独立采样，最后统一对齐步长与约束。

use dip_quant_domain::{ParamKey, StrategyParameters};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::mutation::random_parameters;

pub const DEFAULT_STARTUP_TRIALS: usize = 10;
pub const DEFAULT_GAMMA: f64 = 0.25;
pub const DEFAULT_CANDIDATES: usize = 24;

pub struct TpeSampler {
    rng: StdRng,
    startup_trials: usize,
    gamma: f64,
    candidates: usize,
}

/// 带均匀先验的一维 Parzen 密度
struct Parzen<'a> {
    centers: &'a [f64],
    bandwidth: f64,
}

impl<'a> Parzen<'a> {
    fn new(centers: &'a [f64]) -> Self {
        let n = centers.len().max(1) as f64;
        Self {
            centers,
            bandwidth: (0.3 * n.powf(-0.2)).clamp(0.03, 0.3),
        }
    }

    fn density(&self, x: f64) -> f64 {
        let weight = 1.0 / (self.centers.len() + 1) as f64;
        let norm = 1.0 / (self.bandwidth * (2.0 * std::f64::consts::PI).sqrt());
        let kernels: f64 = self
            .centers
            .iter()
            .map(|c| {
                let z = (x - c) / self.bandwidth;
                norm * (-0.5 * z * z).exp()
            })
            .sum();
        weight * (1.0 + kernels)
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        // 1/(n+1) 概率取先验
        let pick = rng.gen_range(0..=self.centers.len());
        if pick == self.centers.len() {
            return rng.gen::<f64>();
        }
        let z: f64 = rng.sample(StandardNormal);
        (self.centers[pick] + z * self.bandwidth).clamp(0.0, 1.0)
    }
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            startup_trials: DEFAULT_STARTUP_TRIALS,
            gamma: DEFAULT_GAMMA,
            candidates: DEFAULT_CANDIDATES,
        }
    }

    pub fn with_startup_trials(mut self, trials: usize) -> Self {
        self.startup_trials = trials;
        self
    }

    /// 根据已完成的 (参数, 得分) 试验给出下一组参数
    pub fn suggest(&mut self, trials: &[(StrategyParameters, f64)]) -> StrategyParameters {
        let scored: Vec<&(StrategyParameters, f64)> =
            trials.iter().filter(|(_, s)| s.is_finite()).collect();
        if scored.len() < self.startup_trials.max(2) {
            return random_parameters(&mut self.rng);
        }

        let mut ranked = scored;
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let n_good =
            ((ranked.len() as f64 * self.gamma).ceil() as usize).clamp(1, ranked.len() - 1);
        let (good, bad) = ranked.split_at(n_good);

        let mut next = StrategyParameters::default();
        for key in ParamKey::ALL {
            let bounds = key.bounds();
            let span = bounds.span();
            if span <= 0.0 {
                next.set(key, bounds.min);
                continue;
            }
            let to_unit =
                |p: &&(StrategyParameters, f64)| ((p.0.get(key) - bounds.min) / span).clamp(0.0, 1.0);
            let good_x: Vec<f64> = good.iter().map(to_unit).collect();
            let bad_x: Vec<f64> = bad.iter().map(to_unit).collect();
            let l = Parzen::new(&good_x);
            let g = Parzen::new(&bad_x);

            let mut best = (f64::NEG_INFINITY, 0.5);
            for _ in 0..self.candidates {
                let x = l.sample(&mut self.rng);
                let ratio = l.density(x) / g.density(x).max(f64::MIN_POSITIVE);
                if ratio > best.0 {
                    best = (ratio, x);
                }
            }
            next.set(key, bounds.snap(bounds.min + best.1 * span));
        }
        next.enforce_relationships();
        next.normalized()
    }
}
