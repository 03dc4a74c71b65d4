//! 持仓实体 (分批建仓)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("分批建仓已满: 计划 {planned} 笔")]
    TranchesExhausted { planned: u32 },

    #[error("成交参数无效: {0}")]
    InvalidFill(String),
}

/// 单笔分批成交
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrancheFill {
    /// 第几笔 (从 0 开始)
    pub index: u32,
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
    pub filled_at: DateTime<Utc>,
}

impl TrancheFill {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

/// 持仓 - 聚合根
///
/// 平均成本按数量加权，每笔成交后重算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub strategy_id: String,
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    /// 累计买入金额 (不含手续费)
    pub cost_basis: f64,
    pub fees_paid: f64,
    pub planned_tranches: u32,
    pub fills: Vec<TrancheFill>,
    /// 建仓以来的最高价，移动止损只会随之上移
    pub highest_price: f64,
    /// 首笔成交时的 ATR
    pub entry_atr: Option<f64>,
    pub opened_at: DateTime<Utc>,
    /// 已提交平仓单，等待成交
    #[serde(default)]
    pub pending_exit: bool,
    /// 已做过出场判断的最新 K 线时间戳，同一根 K 线不重复判断
    #[serde(default)]
    pub last_bar_ts: Option<i64>,
    /// 已卖出部分累计的已实现盈亏
    #[serde(default)]
    pub partial_exit_pnl: f64,
}

impl Position {
    /// 以首笔成交开仓
    pub fn open(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        planned_tranches: u32,
        fill: TrancheFill,
        entry_atr: Option<f64>,
    ) -> Result<Self, PositionError> {
        Self::check_fill(&fill)?;
        Ok(Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            quantity: fill.quantity,
            avg_entry_price: fill.price,
            cost_basis: fill.notional(),
            fees_paid: fill.fee,
            planned_tranches: planned_tranches.max(1),
            highest_price: fill.price,
            entry_atr,
            opened_at: fill.filled_at,
            fills: vec![fill],
            pending_exit: false,
            last_bar_ts: None,
            partial_exit_pnl: 0.0,
        })
    }

    /// 追加一笔分批成交并重算平均成本
    pub fn apply_fill(&mut self, fill: TrancheFill) -> Result<(), PositionError> {
        Self::check_fill(&fill)?;
        if self.remaining_tranches() == 0 {
            return Err(PositionError::TranchesExhausted {
                planned: self.planned_tranches,
            });
        }
        self.quantity += fill.quantity;
        self.cost_basis += fill.notional();
        self.fees_paid += fill.fee;
        self.avg_entry_price = self.cost_basis / self.quantity;
        self.fills.push(fill);
        Ok(())
    }

    fn check_fill(fill: &TrancheFill) -> Result<(), PositionError> {
        if !(fill.quantity > 0.0 && fill.quantity.is_finite()) {
            return Err(PositionError::InvalidFill(format!("数量={}", fill.quantity)));
        }
        if !(fill.price > 0.0 && fill.price.is_finite()) {
            return Err(PositionError::InvalidFill(format!("价格={}", fill.price)));
        }
        Ok(())
    }

    pub fn filled_tranches(&self) -> u32 {
        self.fills.len() as u32
    }

    pub fn remaining_tranches(&self) -> u32 {
        self.planned_tranches.saturating_sub(self.filled_tranches())
    }

    pub fn last_fill_price(&self) -> Option<f64> {
        self.fills.last().map(|f| f.price)
    }

    pub fn last_fill_at(&self) -> Option<DateTime<Utc>> {
        self.fills.last().map(|f| f.filled_at)
    }

    /// 最高价只升不降
    pub fn ratchet_high(&mut self, price: f64) {
        if price.is_finite() && price > self.highest_price {
            self.highest_price = price;
        }
    }

    /// 该 K 线是否已判断过 (时间戳不晚于检查点)
    pub fn is_bar_checked(&self, bar_ts: i64) -> bool {
        self.last_bar_ts.is_some_and(|ts| bar_ts <= ts)
    }

    /// 检查点只前移
    pub fn mark_bar_checked(&mut self, bar_ts: i64) {
        self.last_bar_ts = Some(self.last_bar_ts.map_or(bar_ts, |ts| ts.max(bar_ts)));
    }

    /// 卖出部分数量，按比例扣减成本与建仓手续费，返回这部分的已实现盈亏
    ///
    /// 数量超过持仓时按持仓数量计，平均成本不变。
    pub fn reduce(&mut self, quantity: f64, exit_price: f64, exit_fee: f64) -> Result<f64, PositionError> {
        if !(quantity > 0.0 && quantity.is_finite()) {
            return Err(PositionError::InvalidFill(format!("数量={}", quantity)));
        }
        if !(exit_price > 0.0 && exit_price.is_finite()) {
            return Err(PositionError::InvalidFill(format!("价格={}", exit_price)));
        }
        let qty = quantity.min(self.quantity);
        let fraction = if self.quantity > 0.0 { qty / self.quantity } else { 1.0 };
        let entry_fees = self.fees_paid * fraction;
        let pnl = (exit_price - self.avg_entry_price) * qty - entry_fees - exit_fee;

        self.quantity -= qty;
        self.cost_basis = (self.cost_basis - self.avg_entry_price * qty).max(0.0);
        self.fees_paid -= entry_fees;
        self.partial_exit_pnl += pnl;
        Ok(pnl)
    }

    /// 剩余数量可忽略，视为已平仓
    pub fn is_flat(&self) -> bool {
        self.quantity <= 1e-9
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.avg_entry_price) * self.quantity
    }

    /// 按出场价计算已实现盈亏 (扣除建仓手续费与出场手续费)
    pub fn realized_pnl(&self, exit_price: f64, exit_fee: f64) -> f64 {
        (exit_price - self.avg_entry_price) * self.quantity - self.fees_paid - exit_fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    fn fill(index: u32, notional: f64, price: f64) -> TrancheFill {
        TrancheFill {
            index,
            quantity: notional / price,
            price,
            fee: 0.0,
            filled_at: Utc::now(),
        }
    }

    #[test]
    fn test_two_tranche_average_is_quantity_weighted() {
        // 仓位 100，分两笔各 50
        let first = fill(0, 50.0, 100.0);
        let second = fill(1, 50.0, 90.0);
        let (q1, q2) = (first.quantity, second.quantity);

        let mut pos = Position::open("s1", "SPY", 2, first, Some(1.5)).unwrap();
        assert_eq!(pos.remaining_tranches(), 1);
        pos.apply_fill(second).unwrap();

        let expected = (q1 * 100.0 + q2 * 90.0) / (q1 + q2);
        assert!(approx_eq!(f64, pos.avg_entry_price, expected, epsilon = 1e-9));
        assert!(approx_eq!(f64, pos.cost_basis, 100.0, epsilon = 1e-9));
        assert_eq!(pos.remaining_tranches(), 0);
        assert_eq!(pos.last_fill_price(), Some(90.0));
    }

    #[test]
    fn test_apply_fill_rejects_extra_tranche() {
        let mut pos = Position::open("s1", "SPY", 1, fill(0, 50.0, 10.0), None).unwrap();
        assert_eq!(
            pos.apply_fill(fill(1, 50.0, 9.0)),
            Err(PositionError::TranchesExhausted { planned: 1 })
        );
    }

    #[test]
    fn test_ratchet_high_never_retreats() {
        let mut pos = Position::open("s1", "SPY", 1, fill(0, 50.0, 10.0), None).unwrap();
        pos.ratchet_high(12.0);
        pos.ratchet_high(11.0);
        assert_eq!(pos.highest_price, 12.0);
    }

    #[test]
    fn test_invalid_fill() {
        let mut bad = fill(0, 50.0, 10.0);
        bad.quantity = 0.0;
        assert!(Position::open("s1", "SPY", 1, bad, None).is_err());
    }

    #[test]
    fn test_bar_checkpoint_only_moves_forward() {
        let mut pos = Position::open("s1", "SPY", 1, fill(0, 50.0, 10.0), None).unwrap();
        assert!(!pos.is_bar_checked(100));
        pos.mark_bar_checked(100);
        assert!(pos.is_bar_checked(100));
        assert!(pos.is_bar_checked(99));
        assert!(!pos.is_bar_checked(101));
        pos.mark_bar_checked(50);
        assert_eq!(pos.last_bar_ts, Some(100));
    }

    #[test]
    fn test_reduce_books_pnl_on_sold_quantity_only() {
        let mut first = fill(0, 100.0, 10.0);
        first.fee = 1.0;
        let mut pos = Position::open("s1", "SPY", 1, first, None).unwrap();

        // 卖出 4/10，按比例分摊建仓手续费
        let pnl = pos.reduce(4.0, 12.0, 0.0).unwrap();
        assert!(approx_eq!(f64, pnl, 8.0 - 0.4, epsilon = 1e-9));
        assert!(approx_eq!(f64, pos.quantity, 6.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, pos.cost_basis, 60.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, pos.fees_paid, 0.6, epsilon = 1e-9));
        assert_eq!(pos.avg_entry_price, 10.0);
        assert!(!pos.is_flat());

        let rest = pos.reduce(100.0, 9.0, 0.0).unwrap();
        assert!(approx_eq!(f64, rest, -6.0 - 0.6, epsilon = 1e-9));
        assert!(pos.is_flat());
        assert!(approx_eq!(f64, pos.partial_exit_pnl, 7.6 - 6.6, epsilon = 1e-9));
        assert!(pos.reduce(0.0, 9.0, 0.0).is_err());
    }
}
