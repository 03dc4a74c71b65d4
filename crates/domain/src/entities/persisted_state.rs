//! 需要跨进程重启保留的状态

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BudgetState, Position, RunnerState, SafetyState};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub runner: RunnerState,
    pub safety: SafetyState,
    pub budget: BudgetState,
    #[serde(default)]
    pub positions: Vec<Position>,
    pub saved_at: DateTime<Utc>,
}
