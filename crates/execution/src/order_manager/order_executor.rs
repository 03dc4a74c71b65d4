//! 下单执行器
//!
//! 所有券商调用都经过超时与重试。普通订单受限流约束，
//! 紧急清仓绕过限流。

use std::sync::Arc;

use dip_quant_common::AppError;
use dip_quant_domain::{Broker, ExitReason, OrderAck, OrderIntent, OrderRequest, OrderSide};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::throttle::OrderThrottle;
use crate::position_manager::PositionBook;
use crate::retry::{with_timeout_retry, RetryPolicy};

/// 紧急清仓结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidationReport {
    /// 本次提交的平仓单 (策略ID, 回执)
    pub submitted: Vec<(String, OrderAck)>,
    /// 已有平仓单在途而跳过的持仓 (策略:标的)
    pub already_pending: Vec<String>,
    /// 提交失败的持仓及原因
    pub failed: Vec<(String, String)>,
}

impl LiquidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    retry: RetryPolicy,
    throttle: OrderThrottle,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn Broker>, retry: RetryPolicy, throttle_per_minute: u32) -> Self {
        Self {
            broker,
            retry,
            throttle: OrderThrottle::per_minute(throttle_per_minute),
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 提交订单，限流时返回瞬时错误，由下一个 tick 重新评估
    pub async fn submit(&mut self, order: &OrderRequest) -> Result<OrderAck, AppError> {
        if !self.throttle.try_acquire(Instant::now()) {
            warn!("下单限流: {} {} 本分钟已达上限", order.symbol, order.side.as_str());
            return Err(AppError::BrokerTransient("下单限流，等待下一个周期".to_string()));
        }
        self.submit_unthrottled(order).await
    }

    async fn submit_unthrottled(&self, order: &OrderRequest) -> Result<OrderAck, AppError> {
        let broker = self.broker.clone();
        let label = format!("提交订单 {}", order.client_order_id);
        let ack = with_timeout_retry(&self.retry, &label, || {
            let broker = broker.clone();
            let order = order.clone();
            async move { broker.submit_order(&order).await }
        })
        .await?;
        info!(
            "订单已提交: {} {} {} qty={:.6} status={:?}",
            ack.client_order_id,
            ack.symbol,
            ack.side.as_str(),
            order.quantity,
            ack.status
        );
        Ok(ack)
    }

    pub async fn order_status(&self, client_order_id: &str) -> Result<OrderAck, AppError> {
        let broker = self.broker.clone();
        let id = client_order_id.to_string();
        with_timeout_retry(&self.retry, "查询订单", || {
            let broker = broker.clone();
            let id = id.clone();
            async move { broker.order_status(&id).await }
        })
        .await
    }

    /// 撤销订单，返回撤单后的回执
    pub async fn cancel_order(&self, client_order_id: &str) -> Result<OrderAck, AppError> {
        let broker = self.broker.clone();
        let id = client_order_id.to_string();
        let ack = with_timeout_retry(&self.retry, "撤销订单", || {
            let broker = broker.clone();
            let id = id.clone();
            async move { broker.cancel_order(&id).await }
        })
        .await?;
        info!("撤单: {} status={:?} filled={:.6}", ack.client_order_id, ack.status, ack.filled_quantity);
        Ok(ack)
    }

    /// 对每个未在平仓中的持仓提交市价卖单
    ///
    /// 已标记 `pending_exit` 的持仓跳过，重复调用不会重复下单。
    pub async fn liquidate_all(&mut self, book: &mut PositionBook) -> LiquidationReport {
        let mut report = LiquidationReport::default();
        let targets: Vec<(String, String, f64, bool)> = book
            .iter()
            .map(|p| (p.strategy_id.clone(), p.symbol.clone(), p.quantity, p.pending_exit))
            .collect();

        for (strategy_id, symbol, quantity, pending) in targets {
            let key = format!("{}:{}", strategy_id, symbol);
            if pending {
                report.already_pending.push(key);
                continue;
            }
            if quantity <= 0.0 {
                continue;
            }
            let order = OrderRequest::market(
                strategy_id.as_str(),
                symbol.as_str(),
                OrderSide::Sell,
                quantity,
                OrderIntent::Exit {
                    reason: ExitReason::Liquidation,
                },
            );
            match self.submit_unthrottled(&order).await {
                Ok(ack) => {
                    if let Some(pos) = book.get_mut(&strategy_id, &symbol) {
                        pos.pending_exit = true;
                    }
                    report.submitted.push((strategy_id, ack));
                }
                Err(e) => {
                    error!("清仓失败 {}: {}", key, e);
                    report.failed.push((key, e.to_string()));
                }
            }
        }
        report
    }
}
