//! Alpaca HTTP 客户端
//!
//! HTTP 状态码映射到错误分类:
//! - 401/403 → `BrokerFatal` (凭证失效，需要人工处理)
//! - 408/429/5xx、超时、连接失败 → `BrokerTransient`
//! - 其他 4xx → `BrokerRejected`

use std::time::Duration;

use dip_quant_common::AppError;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
pub const DATA_URL: &str = "https://data.alpaca.markets";

#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub secret_key: String,
    pub paper: bool,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
}

pub struct AlpacaClient {
    client: Client,
    trading_url: String,
    data_url: String,
    api_key: String,
    secret_key: String,
}

impl AlpacaClient {
    pub fn new(config: &AlpacaConfig) -> Result<Self, AppError> {
        if config.api_key.is_empty() || config.secret_key.is_empty() {
            return Err(AppError::Config("Alpaca API key/secret 未配置".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("HTTP 客户端初始化失败: {}", e)))?;
        let trading_url = if config.paper {
            PAPER_TRADING_URL
        } else {
            LIVE_TRADING_URL
        };
        Ok(Self {
            client,
            trading_url: trading_url.to_string(),
            data_url: DATA_URL.to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    pub async fn trading<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.trading_url, path);
        self.send_request(method, &url, query, body).await
    }

    /// 无响应体的交易接口调用 (如撤单返回 204)
    pub async fn trading_no_content(&self, method: Method, path: &str) -> Result<(), AppError> {
        let url = format!("{}{}", self.trading_url, path);
        self.send_raw(method, &url, &[], None).await.map(|_| ())
    }

    pub async fn data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.data_url, path);
        self.send_request(Method::GET, &url, query, None).await
    }

    async fn send_request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T, AppError> {
        let text = self.send_raw(method, url, query, body).await?;
        serde_json::from_str(&text).map_err(|e| AppError::Parse(format!("{}: {}", url, e)))
    }

    async fn send_raw(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<String, AppError> {
        let mut request = self
            .client
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        debug!("alpaca {} -> {}", url, status);

        if status.is_success() {
            return Ok(text);
        }
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.message)
            .unwrap_or(text);
        Err(classify_status(status, message))
    }
}

fn map_transport_error(e: reqwest::Error) -> AppError {
    AppError::BrokerTransient(format!("请求失败: {}", e))
}

pub fn classify_status(status: StatusCode, message: String) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::BrokerFatal(format!("鉴权失败 ({}): {}", status.as_u16(), message))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            AppError::BrokerTransient(format!("{}: {}", status.as_u16(), message))
        }
        s if s.is_server_error() => {
            AppError::BrokerTransient(format!("{}: {}", status.as_u16(), message))
        }
        _ => AppError::BrokerRejected(format!("{}: {}", status.as_u16(), message)),
    }
}
