//! 随机变异搜索
//!
//! 以当前最优参数为中心做局部搜索: 每个参数 20% 概率在全范围内均匀跳跃，
//! 否则加上标准差为范围 12% 的高斯扰动。结果截断、对齐步长并满足参数间约束。

use dip_quant_domain::{ParamKey, StrategyParameters};
use rand::Rng;
use rand_distr::StandardNormal;

const JUMP_PROBABILITY: f64 = 0.2;
const LOCAL_SIGMA: f64 = 0.12;

fn finish(mut params: StrategyParameters) -> StrategyParameters {
    params = params.normalized();
    params.enforce_relationships();
    params.normalized()
}

pub fn mutate_parameters<R: Rng + ?Sized>(base: &StrategyParameters, rng: &mut R) -> StrategyParameters {
    let mut candidate = base.clone();
    for key in ParamKey::ALL {
        let bounds = key.bounds();
        let span = bounds.span();
        if span <= 0.0 {
            continue;
        }
        let raw = if rng.gen::<f64>() < JUMP_PROBABILITY {
            rng.gen_range(bounds.min..=bounds.max)
        } else {
            let z: f64 = rng.sample(StandardNormal);
            base.get(key) + z * span * LOCAL_SIGMA
        };
        candidate.set(key, bounds.snap(raw));
    }
    finish(candidate)
}

/// 全范围均匀采样
pub fn random_parameters<R: Rng + ?Sized>(rng: &mut R) -> StrategyParameters {
    let mut candidate = StrategyParameters::default();
    for key in ParamKey::ALL {
        let bounds = key.bounds();
        candidate.set(key, bounds.snap(rng.gen_range(bounds.min..=bounds.max)));
    }
    finish(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_well_formed(p: &StrategyParameters) {
        assert!(p.validate().is_ok(), "{:?}", p);
        assert!(p.take_profit_pct >= p.stop_loss_pct * 1.8 - 1e-9);
        assert!(p.trailing_stop_pct >= p.stop_loss_pct * 0.9 - 1e-9);
        assert_eq!(p, &p.normalized());
    }

    #[test]
    fn test_mutations_are_valid_and_vary() {
        let mut rng = StdRng::seed_from_u64(42);
        let base = StrategyParameters::default();
        let mut changed = 0;
        for _ in 0..200 {
            let candidate = mutate_parameters(&base, &mut rng);
            assert_well_formed(&candidate);
            if candidate != base {
                changed += 1;
            }
        }
        assert!(changed > 150);
    }

    #[test]
    fn test_random_parameters_cover_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let draws: Vec<StrategyParameters> = (0..200).map(|_| random_parameters(&mut rng)).collect();
        draws.iter().for_each(assert_well_formed);
        assert!(draws.iter().any(|p| p.dca_tranches == 3));
        assert!(draws.iter().any(|p| p.stop_loss_pct > 8.0));
    }

    #[test]
    fn test_same_seed_same_candidate() {
        let base = StrategyParameters::default();
        let a = mutate_parameters(&base, &mut StdRng::seed_from_u64(9));
        let b = mutate_parameters(&base, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
