use async_trait::async_trait;
use chrono::NaiveDate;
use dip_quant_common::{AppError, Bar};

/// 历史K线数据源
#[async_trait]
pub trait BarSource: Send + Sync {
    /// 区间内的日线 (含首尾)，按时间升序
    async fn load_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, AppError>;
}
