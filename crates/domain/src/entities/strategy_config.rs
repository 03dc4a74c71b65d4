//! 策略配置实体

use chrono::{DateTime, Utc};
use dip_quant_common::AppError;
use serde::{Deserialize, Serialize};

use super::parameters::StrategyParameters;

/// 策略配置
///
/// 运行器只读取配置，修改只能通过显式的配置更新 (含优化器验证通过后的回写)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub parameters: StrategyParameters,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl StrategyConfig {
    pub fn new(id: impl Into<String>, symbols: Vec<String>, parameters: StrategyParameters) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            symbols,
            parameters,
            enabled: true,
            updated_at: None,
        }
    }

    /// 校验配置: 标的列表非空且参数合法
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation("策略ID不能为空".to_string()));
        }
        if self.symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "策略 {} 未配置交易标的",
                self.id
            )));
        }
        self.parameters.validate()
    }

    /// 可参与信号评估
    pub fn is_active(&self) -> bool {
        self.enabled && self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requires_symbols_and_valid_params() {
        let cfg = StrategyConfig::new("dip-spy", vec!["SPY".into()], StrategyParameters::default());
        assert!(cfg.is_active());

        let empty = StrategyConfig::new("dip-none", vec![], StrategyParameters::default());
        assert!(!empty.is_active());

        let mut bad = cfg.clone();
        bad.parameters.stop_loss_pct = 42.0;
        assert!(!bad.is_active());

        let mut disabled = cfg;
        disabled.enabled = false;
        assert!(!disabled.is_active());
    }
}
