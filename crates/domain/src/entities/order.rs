//! 订单请求与券商回执

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{OrderIntent, OrderSide, OrderStatus};

/// 发往券商的市价单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 客户端订单号，重试时保持不变以保证幂等
    pub client_order_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub intent: OrderIntent,
}

impl OrderRequest {
    pub fn market(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        intent: OrderIntent,
    ) -> Self {
        Self {
            client_order_id: format!("dq-{}", Uuid::new_v4()),
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            intent,
        }
    }
}

/// 券商回执
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub client_order_id: String,
    pub broker_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub avg_fill_price: Option<f64>,
    pub submitted_at: DateTime<Utc>,
}

impl OrderAck {
    /// 全部成交
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled && self.filled_quantity > 0.0
    }

    /// 有成交数量，包括撤单或过期前的部分成交
    pub fn has_fill(&self) -> bool {
        self.status != OrderStatus::Rejected && self.filled_quantity > 0.0
    }
}
