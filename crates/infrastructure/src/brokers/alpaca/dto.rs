//! Alpaca 接口数据结构 (金额与数量以字符串返回)

use chrono::{DateTime, Utc};
use dip_quant_common::{AppError, Bar};
use dip_quant_domain::{AccountSnapshot, BrokerPosition, OrderAck, OrderSide, OrderStatus};
use serde::{Deserialize, Serialize};

fn parse_num(field: &str, value: &str) -> Result<f64, AppError> {
    value
        .parse::<f64>()
        .map_err(|_| AppError::Parse(format!("{}={} 不是数字", field, value)))
}

#[derive(Debug, Deserialize)]
pub struct AccountDto {
    pub equity: String,
    pub cash: String,
    pub buying_power: String,
}

impl AccountDto {
    pub fn into_snapshot(self) -> Result<AccountSnapshot, AppError> {
        Ok(AccountSnapshot {
            equity: parse_num("equity", &self.equity)?,
            cash: parse_num("cash", &self.cash)?,
            buying_power: parse_num("buying_power", &self.buying_power)?,
            as_of: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionDto {
    pub symbol: String,
    pub qty: String,
    pub avg_entry_price: String,
    pub current_price: Option<String>,
}

impl PositionDto {
    pub fn into_position(self) -> Result<BrokerPosition, AppError> {
        let avg = parse_num("avg_entry_price", &self.avg_entry_price)?;
        let market = match self.current_price.as_deref() {
            Some(p) => parse_num("current_price", p)?,
            None => avg,
        };
        Ok(BrokerPosition {
            quantity: parse_num("qty", &self.qty)?,
            avg_entry_price: avg,
            market_price: market,
            symbol: self.symbol,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct NewOrderDto {
    pub symbol: String,
    pub qty: String,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub time_in_force: &'static str,
    pub client_order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderDto {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub status: String,
    #[serde(default)]
    pub filled_qty: Option<String>,
    #[serde(default)]
    pub filled_avg_price: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

pub fn map_order_status(status: &str) -> OrderStatus {
    match status {
        "filled" | "done_for_day" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "canceled" | "expired" | "replaced" => OrderStatus::Canceled,
        "rejected" | "suspended" => OrderStatus::Rejected,
        _ => OrderStatus::Pending,
    }
}

impl OrderDto {
    pub fn into_ack(self) -> Result<OrderAck, AppError> {
        let side = match self.side.as_str() {
            "buy" => OrderSide::Buy,
            "sell" => OrderSide::Sell,
            other => return Err(AppError::Parse(format!("未知买卖方向: {}", other))),
        };
        let filled = match self.filled_qty.as_deref() {
            Some(q) => parse_num("filled_qty", q)?,
            None => 0.0,
        };
        let avg = match self.filled_avg_price.as_deref() {
            Some(p) => Some(parse_num("filled_avg_price", p)?),
            None => None,
        };
        Ok(OrderAck {
            status: map_order_status(&self.status),
            client_order_id: self.client_order_id,
            broker_order_id: self.id,
            symbol: self.symbol,
            side,
            filled_quantity: filled,
            avg_fill_price: avg,
            submitted_at: self.submitted_at.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BarDto {
    pub t: DateTime<Utc>,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    #[serde(default)]
    pub v: f64,
}

impl From<BarDto> for Bar {
    fn from(b: BarDto) -> Self {
        Bar::new(b.t.timestamp_millis(), b.o, b.h, b.l, b.c, b.v)
    }
}

#[derive(Debug, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: Option<Vec<BarDto>>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarDayDto {
    pub date: String,
    pub open: String,
    pub close: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_dto_parsing() {
        let json = r#"{
            "id": "abc",
            "client_order_id": "dq-1",
            "symbol": "SPY",
            "side": "buy",
            "status": "filled",
            "filled_qty": "1.5",
            "filled_avg_price": "470.25",
            "submitted_at": "2024-01-03T15:00:00Z"
        }"#;
        let ack = serde_json::from_str::<OrderDto>(json).unwrap().into_ack().unwrap();
        assert!(ack.is_filled());
        assert_eq!(ack.filled_quantity, 1.5);
        assert_eq!(ack.avg_fill_price, Some(470.25));
    }

    #[test]
    fn test_canceled_order_keeps_partial_fill() {
        let json = r#"{
            "id": "abc",
            "client_order_id": "dq-2",
            "symbol": "SPY",
            "side": "sell",
            "status": "canceled",
            "filled_qty": "0.5",
            "filled_avg_price": "468.10"
        }"#;
        let ack = serde_json::from_str::<OrderDto>(json).unwrap().into_ack().unwrap();
        assert_eq!(ack.status, OrderStatus::Canceled);
        assert!(ack.has_fill());
        assert!(!ack.is_filled());
        assert_eq!(ack.filled_quantity, 0.5);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_order_status("accepted"), OrderStatus::Pending);
        assert_eq!(map_order_status("expired"), OrderStatus::Canceled);
        assert_eq!(map_order_status("suspended"), OrderStatus::Rejected);
    }

    #[test]
    fn test_account_numbers_are_strings() {
        let json = r#"{"equity":"1000.5","cash":"200","buying_power":"400"}"#;
        let snap = serde_json::from_str::<AccountDto>(json)
            .unwrap()
            .into_snapshot()
            .unwrap();
        assert_eq!(snap.equity, 1000.5);

        let bad = AccountDto {
            equity: "n/a".into(),
            cash: "0".into(),
            buying_power: "0".into(),
        };
        assert!(matches!(bad.into_snapshot(), Err(AppError::Parse(_))));
    }
}
