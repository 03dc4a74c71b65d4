use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dip_quant_common::{AppError, Bar};
use dip_quant_domain::{AccountSnapshot, Broker, BrokerPosition, OrderAck, OrderRequest};
use reqwest::Method;

use super::client::{AlpacaClient, AlpacaConfig};
use super::dto::{AccountDto, BarsResponse, NewOrderDto, OrderDto, PositionDto};

/// Alpaca 券商
pub struct AlpacaBroker {
    client: Arc<AlpacaClient>,
}

impl AlpacaBroker {
    pub fn new(config: &AlpacaConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: Arc::new(AlpacaClient::new(config)?),
        })
    }

    pub fn client(&self) -> Arc<AlpacaClient> {
        self.client.clone()
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    async fn check_connectivity(&self) -> Result<(), AppError> {
        self.client
            .trading::<serde_json::Value>(Method::GET, "/v2/clock", &[], None)
            .await
            .map(|_| ())
    }

    async fn account(&self) -> Result<AccountSnapshot, AppError> {
        let dto: AccountDto = self
            .client
            .trading(Method::GET, "/v2/account", &[], None)
            .await?;
        dto.into_snapshot()
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, AppError> {
        let list: Vec<PositionDto> = self
            .client
            .trading(Method::GET, "/v2/positions", &[], None)
            .await?;
        list.into_iter().map(PositionDto::into_position).collect()
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, AppError> {
        // 同一客户端订单号已提交过则直接返回原订单
        if let Ok(existing) = self.order_status(&order.client_order_id).await {
            return Ok(existing);
        }
        let body = NewOrderDto {
            symbol: order.symbol.clone(),
            qty: format!("{:.6}", order.quantity),
            side: order.side.as_str(),
            order_type: "market",
            time_in_force: "day",
            client_order_id: order.client_order_id.clone(),
        };
        let body = serde_json::to_value(&body)?;
        let dto: OrderDto = self
            .client
            .trading(Method::POST, "/v2/orders", &[], Some(&body))
            .await?;
        dto.into_ack()
    }

    async fn order_status(&self, client_order_id: &str) -> Result<OrderAck, AppError> {
        let dto: OrderDto = self
            .client
            .trading(
                Method::GET,
                "/v2/orders:by_client_order_id",
                &[("client_order_id", client_order_id.to_string())],
                None,
            )
            .await?;
        dto.into_ack()
    }

    async fn cancel_order(&self, client_order_id: &str) -> Result<OrderAck, AppError> {
        let ack = self.order_status(client_order_id).await?;
        if ack.status.is_terminal() {
            return Ok(ack);
        }
        self.client
            .trading_no_content(Method::DELETE, &format!("/v2/orders/{}", ack.broker_order_id))
            .await?;
        // 撤单是异步的，回执可能仍是 pending_cancel
        self.order_status(client_order_id).await
    }

    async fn recent_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, AppError> {
        // 日历天数约为交易日的 1.5 倍，多取一些再截断
        let start = Utc::now() - Duration::days((limit as i64) * 2 + 10);
        let resp: BarsResponse = self
            .client
            .data(
                &format!("/v2/stocks/{}/bars", symbol),
                &[
                    ("timeframe", "1Day".to_string()),
                    ("start", start.format("%Y-%m-%d").to_string()),
                    ("limit", "10000".to_string()),
                    ("adjustment", "raw".to_string()),
                ],
            )
            .await?;
        let mut bars: Vec<Bar> = resp
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(Bar::from)
            .collect();
        bars.sort_by_key(|b| b.ts);
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.split_off(skip))
    }
}
