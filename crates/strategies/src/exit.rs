//! 出场判断
//!
//! 每根K线按顺序检查，先命中者生效:
//! 止损 → 移动止损 → ATR 止损 → 止盈 → 最长持有天数。
//! 止损类成交价取止损价与K线最低价中较差者，跳空时不会按止损价乐观成交。
//! 本根K线的最高价在出场检查之后才用于抬升移动止损。

use dip_quant_common::{utils::held_days, Bar};
use dip_quant_domain::{ExitReason, Position, StrategyParameters};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub reason: ExitReason,
    /// 预期成交价 (未计滑点)
    pub price: f64,
}

impl ExitSignal {
    fn new(reason: ExitReason, price: f64) -> Self {
        Self { reason, price }
    }
}

fn stop_fill(stop: f64, bar: &Bar) -> Option<f64> {
    if bar.low <= stop {
        Some(stop.min(bar.low))
    } else {
        None
    }
}

pub fn evaluate_exit(
    params: &StrategyParameters,
    position: &Position,
    bar: &Bar,
) -> Option<ExitSignal> {
    let entry = position.avg_entry_price;

    let stop = entry * (1.0 - params.stop_loss_pct / 100.0);
    if let Some(price) = stop_fill(stop, bar) {
        return Some(ExitSignal::new(ExitReason::StopLoss, price));
    }

    let trail = position.highest_price * (1.0 - params.trailing_stop_pct / 100.0);
    if let Some(price) = stop_fill(trail, bar) {
        return Some(ExitSignal::new(ExitReason::TrailingStop, price));
    }

    if let Some(atr) = position.entry_atr.filter(|a| *a > 0.0) {
        let atr_stop = entry - params.atr_stop_mult * atr;
        if let Some(price) = stop_fill(atr_stop, bar) {
            return Some(ExitSignal::new(ExitReason::AtrStop, price));
        }
    }

    let target = entry * (1.0 + params.take_profit_pct / 100.0);
    if bar.high >= target {
        return Some(ExitSignal::new(ExitReason::TakeProfit, target));
    }

    if let Some(now) = bar.datetime() {
        if held_days(position.opened_at, now) >= params.max_hold_days as i64 {
            return Some(ExitSignal::new(ExitReason::MaxHold, bar.close));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::tests::{bar_at, T0};
    use chrono::DateTime;
    use dip_quant_domain::TrancheFill;

    fn position(price: f64, atr: Option<f64>) -> Position {
        let fill = TrancheFill {
            index: 0,
            quantity: 1.0,
            price,
            fee: 0.0,
            filled_at: DateTime::from_timestamp_millis(T0).unwrap(),
        };
        Position::open("s1", "SPY", 1, fill, atr).unwrap()
    }

    fn params() -> StrategyParameters {
        StrategyParameters {
            stop_loss_pct: 2.0,
            trailing_stop_pct: 3.0,
            take_profit_pct: 5.0,
            atr_stop_mult: 2.0,
            max_hold_days: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_gap_through_stop_fills_at_bar_low() {
        let pos = position(100.0, None);
        let bar = Bar::new(T0 + 86_400_000, 97.0, 97.5, 96.0, 97.2, 0.0);
        let exit = evaluate_exit(&params(), &pos, &bar).unwrap();
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.price, 96.0);
    }

    #[test]
    fn test_stop_touch_fills_at_low() {
        let pos = position(100.0, None);
        let bar = Bar::new(T0 + 86_400_000, 99.5, 100.0, 97.9, 99.0, 0.0);
        let exit = evaluate_exit(&params(), &pos, &bar).unwrap();
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.price, 97.9);
    }

    #[test]
    fn test_trailing_stop_follows_high() {
        let mut pos = position(100.0, None);
        pos.ratchet_high(110.0);
        // 110 * 0.97 = 106.7
        let bar = Bar::new(T0 + 86_400_000, 108.0, 108.5, 106.0, 107.0, 0.0);
        let exit = evaluate_exit(&params(), &pos, &bar).unwrap();
        assert_eq!(exit.reason, ExitReason::TrailingStop);
        assert_eq!(exit.price, 106.0);
    }

    #[test]
    fn test_atr_stop() {
        let p = StrategyParameters {
            trailing_stop_pct: 10.0,
            stop_loss_pct: 10.0,
            take_profit_pct: 20.0,
            ..params()
        };
        // 100 - 2 * 2 = 96
        let pos = position(100.0, Some(2.0));
        let bar = Bar::new(T0 + 86_400_000, 97.0, 97.5, 95.5, 96.5, 0.0);
        let exit = evaluate_exit(&p, &pos, &bar).unwrap();
        assert_eq!(exit.reason, ExitReason::AtrStop);
        assert_eq!(exit.price, 95.5);
    }

    #[test]
    fn test_take_profit_fills_at_target() {
        let pos = position(100.0, None);
        let bar = Bar::new(T0 + 86_400_000, 101.0, 107.0, 100.5, 106.0, 0.0);
        let exit = evaluate_exit(&params(), &pos, &bar).unwrap();
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert!((exit.price - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_hold() {
        let pos = position(100.0, None);
        let bar = bar_at(9, 100.0);
        assert!(evaluate_exit(&params(), &pos, &bar).is_none());
        let bar = bar_at(10, 100.0);
        let exit = evaluate_exit(&params(), &pos, &bar).unwrap();
        assert_eq!(exit.reason, ExitReason::MaxHold);
        assert_eq!(exit.price, 100.0);
    }
}
