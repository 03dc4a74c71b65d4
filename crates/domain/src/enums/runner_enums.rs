//! 运行器相关枚举

use serde::{Deserialize, Serialize};

/// 运行器状态
///
/// 合法迁移:
/// - STOPPED -> RUNNING | SLEEPING
/// - RUNNING <-> SLEEPING
/// - RUNNING | SLEEPING -> ERROR
/// - 任意状态 -> STOPPED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    Stopped,
    Running,
    Sleeping,
    Error,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerStatus::Stopped => "STOPPED",
            RunnerStatus::Running => "RUNNING",
            RunnerStatus::Sleeping => "SLEEPING",
            RunnerStatus::Error => "ERROR",
        }
    }

    /// 是否处于调度循环中
    pub fn is_active(&self) -> bool {
        matches!(self, RunnerStatus::Running | RunnerStatus::Sleeping)
    }

    pub fn can_transition_to(&self, next: RunnerStatus) -> bool {
        use RunnerStatus::*;
        matches!(
            (self, next),
            (Stopped, Running)
                | (Stopped, Sleeping)
                | (Running, Sleeping)
                | (Sleeping, Running)
                | (Running, Error)
                | (Sleeping, Error)
                | (_, Stopped)
        )
    }
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 回撤熔断范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawdownScope {
    /// 单策略权益曲线，仅暂停该策略
    Strategy,
    /// 账户权益，暂停全部策略
    Account,
}

impl std::str::FromStr for DrawdownScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strategy" => Ok(DrawdownScope::Strategy),
            "account" => Ok(DrawdownScope::Account),
            other => Err(format!("未知的回撤范围: {}", other)),
        }
    }
}

/// 券商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    Paper,
    Alpaca,
}

impl std::str::FromStr for BrokerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" => Ok(BrokerKind::Paper),
            "alpaca" => Ok(BrokerKind::Alpaca),
            other => Err(format!("未知的券商类型: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RunnerStatus::*;
    use super::*;

    #[test]
    fn test_runner_edges() {
        assert!(Stopped.can_transition_to(Running));
        assert!(Stopped.can_transition_to(Sleeping));
        assert!(Running.can_transition_to(Sleeping));
        assert!(Sleeping.can_transition_to(Running));
        assert!(Sleeping.can_transition_to(Error));
        assert!(Error.can_transition_to(Stopped));

        assert!(!Stopped.can_transition_to(Error));
        assert!(!Error.can_transition_to(Running));
        assert!(!Error.can_transition_to(Sleeping));
    }

    #[test]
    fn test_drawdown_scope_parse() {
        assert_eq!("Account".parse::<DrawdownScope>(), Ok(DrawdownScope::Account));
        assert_eq!("strategy".parse::<DrawdownScope>(), Ok(DrawdownScope::Strategy));
        assert!("both".parse::<DrawdownScope>().is_err());
    }
}
