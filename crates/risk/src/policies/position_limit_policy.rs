//! 持仓限额策略 (下单前检查)

/// 持仓限额策略
#[derive(Debug, Clone, Copy)]
pub struct PositionLimitPolicy {
    /// 单标的持仓金额上限
    pub max_position_size: f64,
    pub max_open_positions: Option<u32>,
}

impl PositionLimitPolicy {
    pub fn new(max_position_size: f64) -> Self {
        Self {
            max_position_size,
            max_open_positions: None,
        }
    }

    pub fn with_max_open_positions(mut self, max: Option<u32>) -> Self {
        self.max_open_positions = max;
        self
    }

    pub fn check_open_positions(&self, open: usize) -> Result<(), String> {
        match self.max_open_positions {
            Some(max) if open >= max as usize => {
                Err(format!("已持有 {} 个标的，达到上限 {}", open, max))
            }
            _ => Ok(()),
        }
    }

    pub fn check_buying_power(&self, notional: f64, buying_power: f64) -> Result<(), String> {
        if notional > buying_power {
            return Err(format!(
                "购买力不足: 需要 {:.2}，可用 {:.2}",
                notional, buying_power
            ));
        }
        Ok(())
    }

    pub fn check_position_size(
        &self,
        current_position_value: f64,
        notional: f64,
    ) -> Result<(), String> {
        let total = current_position_value + notional;
        if total > self.max_position_size {
            return Err(format!(
                "持仓金额 {:.2} 超过单标的上限 {:.2}",
                total, self.max_position_size
            ));
        }
        Ok(())
    }

    pub fn check_tranches(&self, filled: u32, planned: u32) -> Result<(), String> {
        if filled >= planned {
            return Err(format!("分批建仓已满 ({}/{})", filled, planned));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        let policy = PositionLimitPolicy::new(1000.0);
        assert!(policy.check_buying_power(100.0, 99.0).is_err());
        assert!(policy.check_buying_power(100.0, 100.0).is_ok());
        assert!(policy.check_position_size(950.0, 100.0).is_err());
        assert!(policy.check_position_size(900.0, 100.0).is_ok());
        assert!(policy.check_tranches(2, 2).is_err());
        assert!(policy.check_tranches(1, 2).is_ok());
        assert!(policy.check_open_positions(99).is_ok());
        let capped = policy.with_max_open_positions(Some(3));
        assert!(capped.check_open_positions(3).is_err());
        assert!(capped.check_open_positions(2).is_ok());
    }
}
