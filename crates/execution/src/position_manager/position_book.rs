//! 分批持仓簿，按 (策略, 标的) 索引

use std::collections::BTreeMap;

use dip_quant_domain::{Position, PositionError, TrancheFill};

pub fn position_key(strategy_id: &str, symbol: &str) -> String {
    format!("{}:{}", strategy_id, symbol)
}

/// 把目标仓位均分为 N 笔
pub fn tranche_legs(position_size: f64, tranches: u32) -> Vec<f64> {
    let n = tranches.max(1);
    vec![position_size / n as f64; n as usize]
}

/// 一次平仓成交的结算结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSettlement {
    pub quantity: f64,
    /// 本次成交数量的已实现盈亏
    pub pnl: f64,
    /// 持仓全部平掉时为整笔交易的盈亏，部分成交时为 None
    pub trade_pnl: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: BTreeMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions(positions: Vec<Position>) -> Self {
        let positions = positions
            .into_iter()
            .map(|p| (position_key(&p.strategy_id, &p.symbol), p))
            .collect();
        Self { positions }
    }

    pub fn to_vec(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn get(&self, strategy_id: &str, symbol: &str) -> Option<&Position> {
        self.positions.get(&position_key(strategy_id, symbol))
    }

    pub fn get_mut(&mut self, strategy_id: &str, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(&position_key(strategy_id, symbol))
    }

    /// 首笔开仓或追加一笔成交
    pub fn apply_entry_fill(
        &mut self,
        strategy_id: &str,
        symbol: &str,
        planned_tranches: u32,
        fill: TrancheFill,
        entry_atr: Option<f64>,
    ) -> Result<&Position, PositionError> {
        let key = position_key(strategy_id, symbol);
        match self.positions.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => {
                let pos = entry.into_mut();
                pos.apply_fill(fill)?;
                Ok(pos)
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                let pos = Position::open(strategy_id, symbol, planned_tranches, fill, entry_atr)?;
                Ok(entry.insert(pos))
            }
        }
    }

    /// 按成交数量结算平仓，持仓卖完后移除
    ///
    /// 持仓不存在时返回 `Ok(None)`。
    pub fn settle_exit(
        &mut self,
        strategy_id: &str,
        symbol: &str,
        quantity: f64,
        price: f64,
        fee: f64,
    ) -> Result<Option<ExitSettlement>, PositionError> {
        let key = position_key(strategy_id, symbol);
        let Some(pos) = self.positions.get_mut(&key) else {
            return Ok(None);
        };
        let sold = quantity.min(pos.quantity);
        let pnl = pos.reduce(quantity, price, fee)?;
        let trade_pnl = if pos.is_flat() {
            let total = pos.partial_exit_pnl;
            self.positions.remove(&key);
            Some(total)
        } else {
            None
        };
        Ok(Some(ExitSettlement {
            quantity: sold,
            pnl,
            trade_pnl,
        }))
    }

    pub fn close(&mut self, strategy_id: &str, symbol: &str) -> Option<Position> {
        self.positions.remove(&position_key(strategy_id, symbol))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.positions.values_mut()
    }

    pub fn for_strategy<'a>(&'a self, strategy_id: &'a str) -> impl Iterator<Item = &'a Position> {
        self.positions
            .values()
            .filter(move |p| p.strategy_id == strategy_id)
    }

    /// 某标的在所有策略下的持仓数量
    pub fn symbol_quantity(&self, symbol: &str) -> f64 {
        self.positions
            .values()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.quantity)
            .sum()
    }

    /// 策略持仓按给定价格计的市值
    pub fn strategy_market_value(&self, strategy_id: &str, price_of: impl Fn(&str) -> Option<f64>) -> f64 {
        self.for_strategy(strategy_id)
            .map(|p| p.market_value(price_of(&p.symbol).unwrap_or(p.avg_entry_price)))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
