//! 模拟盘券商
//!
//! 市价单默认按最新价立即成交。可注入连接故障，用于演练重试和 ERROR 状态；
//! 也可以挂起订单 (`set_hold_orders`)，模拟券商迟迟不成交或部分成交。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dip_quant_common::{AppError, Bar};
use dip_quant_domain::{
    AccountSnapshot, Broker, BrokerPosition, OrderAck, OrderRequest, OrderSide, OrderStatus,
};
use tokio::sync::Mutex;
use tracing::debug;

/// 注入的故障，对每次调用生效直到清除
#[derive(Debug, Clone, PartialEq)]
pub enum PaperFault {
    /// 超时/限流一类的瞬时错误
    Transient(String),
    /// 鉴权失败
    Auth(String),
}

#[derive(Debug, Clone, Copy)]
struct PaperPosition {
    quantity: f64,
    avg_entry_price: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    cash: f64,
    positions: BTreeMap<String, PaperPosition>,
    prices: BTreeMap<String, f64>,
    bars: BTreeMap<String, Vec<Bar>>,
    orders: BTreeMap<String, OrderAck>,
    /// 挂起未成交的订单
    held: BTreeMap<String, OrderRequest>,
    hold_orders: bool,
    submitted: Vec<OrderRequest>,
    order_counter: u64,
    fault: Option<PaperFault>,
}

impl PaperState {
    fn check_fault(&self) -> Result<(), AppError> {
        match &self.fault {
            None => Ok(()),
            Some(PaperFault::Transient(msg)) => Err(AppError::BrokerTransient(msg.clone())),
            Some(PaperFault::Auth(msg)) => Err(AppError::BrokerFatal(msg.clone())),
        }
    }

    fn equity(&self) -> f64 {
        self.cash
            + self
                .positions
                .iter()
                .map(|(symbol, p)| {
                    p.quantity * self.prices.get(symbol).copied().unwrap_or(p.avg_entry_price)
                })
                .sum::<f64>()
    }

    /// 按价格成交 `quantity`，返回实际成交数量 (0 表示拒单)
    fn execute(&mut self, order: &OrderRequest, quantity: f64, price: f64) -> f64 {
        match order.side {
            OrderSide::Buy => {
                let cost = quantity * price;
                if cost > self.cash + 1e-9 {
                    return 0.0;
                }
                self.cash -= cost;
                let pos = self
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert(PaperPosition {
                        quantity: 0.0,
                        avg_entry_price: price,
                    });
                let total = pos.quantity + quantity;
                pos.avg_entry_price = (pos.quantity * pos.avg_entry_price + quantity * price) / total;
                pos.quantity = total;
                quantity
            }
            OrderSide::Sell => {
                let held = self.positions.get(&order.symbol).map_or(0.0, |p| p.quantity);
                let qty = quantity.min(held);
                if qty <= 0.0 {
                    return 0.0;
                }
                self.cash += qty * price;
                let remove = match self.positions.get_mut(&order.symbol) {
                    Some(pos) => {
                        pos.quantity -= qty;
                        pos.quantity <= 1e-12
                    }
                    None => false,
                };
                if remove {
                    self.positions.remove(&order.symbol);
                }
                qty
            }
        }
    }
}

pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                cash: starting_cash,
                ..Default::default()
            }),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.state.lock().await.prices.insert(symbol.to_string(), price);
    }

    /// 设置日线，最新价取最后一根收盘价
    pub async fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        let mut state = self.state.lock().await;
        if let Some(last) = bars.last() {
            state.prices.insert(symbol.to_string(), last.close);
        }
        state.bars.insert(symbol.to_string(), bars);
    }

    pub async fn push_bar(&self, symbol: &str, bar: Bar) {
        let mut state = self.state.lock().await;
        state.prices.insert(symbol.to_string(), bar.close);
        state.bars.entry(symbol.to_string()).or_default().push(bar);
    }

    pub async fn set_fault(&self, fault: Option<PaperFault>) {
        self.state.lock().await.fault = fault;
    }

    /// 打开后新订单只挂起，不成交，直到 `release_held`
    pub async fn set_hold_orders(&self, hold: bool) {
        self.state.lock().await.hold_orders = hold;
    }

    /// 按最新价成交全部挂起订单的 `fill_ratio` 部分
    ///
    /// 比例小于 1 时剩余数量视为过期，订单以 `Canceled` 结束。返回处理的订单数。
    pub async fn release_held(&self, fill_ratio: f64) -> usize {
        let mut state = self.state.lock().await;
        let held = std::mem::take(&mut state.held);
        let ratio = fill_ratio.clamp(0.0, 1.0);
        for (id, order) in &held {
            let price = state.prices.get(&order.symbol).copied();
            let filled = match price {
                Some(price) if ratio > 0.0 => state.execute(order, order.quantity * ratio, price),
                _ => 0.0,
            };
            let status = if filled <= 0.0 && ratio > 0.0 {
                OrderStatus::Rejected
            } else if ratio < 1.0 {
                OrderStatus::Canceled
            } else {
                OrderStatus::Filled
            };
            if let Some(ack) = state.orders.get_mut(id) {
                ack.status = status;
                ack.filled_quantity = filled;
                ack.avg_fill_price = price.filter(|_| filled > 0.0);
            }
        }
        held.len()
    }

    pub async fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn cash(&self) -> f64 {
        self.state.lock().await.cash
    }

    fn ack(order: &OrderRequest, id: String, status: OrderStatus, filled: f64, price: Option<f64>) -> OrderAck {
        OrderAck {
            client_order_id: order.client_order_id.clone(),
            broker_order_id: id,
            symbol: order.symbol.clone(),
            side: order.side,
            status,
            filled_quantity: filled,
            avg_fill_price: price,
            submitted_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn check_connectivity(&self) -> Result<(), AppError> {
        self.state.lock().await.check_fault()
    }

    async fn account(&self) -> Result<AccountSnapshot, AppError> {
        let state = self.state.lock().await;
        state.check_fault()?;
        Ok(AccountSnapshot {
            equity: state.equity(),
            cash: state.cash,
            buying_power: state.cash,
            as_of: Utc::now(),
        })
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, AppError> {
        let state = self.state.lock().await;
        state.check_fault()?;
        Ok(state
            .positions
            .iter()
            .map(|(symbol, p)| BrokerPosition {
                symbol: symbol.clone(),
                quantity: p.quantity,
                avg_entry_price: p.avg_entry_price,
                market_price: state.prices.get(symbol).copied().unwrap_or(p.avg_entry_price),
            })
            .collect())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, AppError> {
        let mut state = self.state.lock().await;
        state.check_fault()?;
        if let Some(existing) = state.orders.get(&order.client_order_id) {
            return Ok(existing.clone());
        }
        let Some(price) = state.prices.get(&order.symbol).copied() else {
            return Err(AppError::BrokerRejected(format!("{} 无行情", order.symbol)));
        };

        state.order_counter += 1;
        let id = format!("paper-{}", state.order_counter);
        state.submitted.push(order.clone());

        let ack = if state.hold_orders {
            state.held.insert(order.client_order_id.clone(), order.clone());
            Self::ack(order, id, OrderStatus::Pending, 0.0, None)
        } else {
            match state.execute(order, order.quantity, price) {
                filled if filled > 0.0 => {
                    Self::ack(order, id, OrderStatus::Filled, filled, Some(price))
                }
                _ => Self::ack(order, id, OrderStatus::Rejected, 0.0, None),
            }
        };
        debug!("模拟盘订单 {} -> {:?}", ack.client_order_id, ack.status);
        state.orders.insert(order.client_order_id.clone(), ack.clone());
        Ok(ack)
    }

    async fn order_status(&self, client_order_id: &str) -> Result<OrderAck, AppError> {
        let state = self.state.lock().await;
        state.check_fault()?;
        state
            .orders
            .get(client_order_id)
            .cloned()
            .ok_or_else(|| AppError::BrokerRejected(format!("订单不存在: {}", client_order_id)))
    }

    async fn cancel_order(&self, client_order_id: &str) -> Result<OrderAck, AppError> {
        let mut state = self.state.lock().await;
        state.check_fault()?;
        if state.held.remove(client_order_id).is_some() {
            if let Some(ack) = state.orders.get_mut(client_order_id) {
                ack.status = OrderStatus::Canceled;
            }
        }
        state
            .orders
            .get(client_order_id)
            .cloned()
            .ok_or_else(|| AppError::BrokerRejected(format!("订单不存在: {}", client_order_id)))
    }

    async fn recent_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, AppError> {
        let state = self.state.lock().await;
        state.check_fault()?;
        let bars = state.bars.get(symbol).map(Vec::as_slice).unwrap_or(&[]);
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dip_quant_domain::OrderIntent;

    fn buy(qty: f64) -> OrderRequest {
        OrderRequest::market("s1", "SPY", OrderSide::Buy, qty, OrderIntent::Entry { tranche: 0 })
    }

    #[tokio::test]
    async fn test_market_fill_and_idempotent_resubmit() {
        let broker = PaperBroker::new(1_000.0);
        broker.set_price("SPY", 100.0).await;

        let order = buy(2.0);
        let ack = broker.submit_order(&order).await.unwrap();
        assert!(ack.is_filled());
        assert_eq!(broker.cash().await, 800.0);

        // 相同客户端订单号不会重复成交
        let again = broker.submit_order(&order).await.unwrap();
        assert_eq!(again.broker_order_id, ack.broker_order_id);
        assert_eq!(broker.cash().await, 800.0);

        broker.set_price("SPY", 110.0).await;
        let account = broker.account().await.unwrap();
        assert_eq!(account.equity, 1_020.0);
    }

    #[tokio::test]
    async fn test_insufficient_cash_rejected() {
        let broker = PaperBroker::new(100.0);
        broker.set_price("SPY", 100.0).await;
        let ack = broker.submit_order(&buy(2.0)).await.unwrap();
        assert_eq!(ack.status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn test_held_orders_cancel_or_partially_fill() {
        let broker = PaperBroker::new(1_000.0);
        broker.set_price("SPY", 100.0).await;
        broker.set_hold_orders(true).await;

        let first = buy(2.0);
        let ack = broker.submit_order(&first).await.unwrap();
        assert_eq!(ack.status, OrderStatus::Pending);
        assert_eq!(broker.cash().await, 1_000.0);

        let canceled = broker.cancel_order(&first.client_order_id).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(!canceled.has_fill());

        let second = buy(4.0);
        broker.submit_order(&second).await.unwrap();
        assert_eq!(broker.release_held(0.5).await, 1);
        let partial = broker.order_status(&second.client_order_id).await.unwrap();
        assert_eq!(partial.status, OrderStatus::Canceled);
        assert_eq!(partial.filled_quantity, 2.0);
        assert_eq!(broker.cash().await, 800.0);

        // 已终态的订单撤单只返回原回执
        let again = broker.cancel_order(&second.client_order_id).await.unwrap();
        assert_eq!(again, partial);
        assert!(broker.cancel_order("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let broker = PaperBroker::new(100.0);
        broker
            .set_fault(Some(PaperFault::Transient("timeout".into())))
            .await;
        assert!(broker.check_connectivity().await.unwrap_err().is_transient());
        broker.set_fault(Some(PaperFault::Auth("401".into()))).await;
        assert!(broker.account().await.unwrap_err().is_fatal());
        broker.set_fault(None).await;
        assert!(broker.check_connectivity().await.is_ok());
    }
}
