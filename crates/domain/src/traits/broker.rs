//! 券商抽象接口

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dip_quant_common::{AppError, Bar};
use serde::{Deserialize, Serialize};

use crate::entities::{OrderAck, OrderRequest};

/// 账户快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
    pub as_of: DateTime<Utc>,
}

/// 券商侧持仓
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub market_price: f64,
}

/// 券商接口
///
/// 错误分类遵循 `AppError`: 超时/限流返回 `BrokerTransient`，
/// 鉴权失败返回 `BrokerFatal`。
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check_connectivity(&self) -> Result<(), AppError>;

    async fn account(&self) -> Result<AccountSnapshot, AppError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, AppError>;

    /// 提交订单，`client_order_id` 相同的重复提交必须幂等
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, AppError>;

    /// 按客户端订单号查询订单
    async fn order_status(&self, client_order_id: &str) -> Result<OrderAck, AppError>;

    /// 撤销未成交订单，返回撤单后的最新回执
    ///
    /// 已进入终态的订单原样返回；券商异步撤单时回执可能仍是非终态。
    async fn cancel_order(&self, client_order_id: &str) -> Result<OrderAck, AppError>;

    /// 最近 `limit` 根日线，按时间升序
    async fn recent_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, AppError>;
}
