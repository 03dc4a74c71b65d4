//! 运行器状态

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::RunnerStatus;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("非法的状态迁移: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunnerStatus,
    pub to: RunnerStatus,
}

/// 运行器状态 (进程内单例，由调度器独占写入)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerState {
    pub status: RunnerStatus,
    pub strategy_ids: Vec<String>,
    pub tick_interval_secs: u64,
    pub broker_connected: bool,
    pub poll_success_count: u64,
    pub poll_error_count: u64,
    pub last_poll_error: Option<String>,
    pub last_poll_error_at: Option<DateTime<Utc>>,
    pub last_poll_ok_at: Option<DateTime<Utc>>,
    pub sleeping: bool,
    pub sleep_since: Option<DateTime<Utc>>,
    pub next_market_open_at: Option<DateTime<Utc>>,
    pub last_resume_at: Option<DateTime<Utc>>,
    pub resume_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub tick_count: u64,
    /// 进入 ERROR 的原因
    pub error_reason: Option<String>,
}

impl RunnerState {
    pub fn stopped(strategy_ids: Vec<String>, tick_interval_secs: u64) -> Self {
        Self {
            status: RunnerStatus::Stopped,
            strategy_ids,
            tick_interval_secs,
            broker_connected: false,
            poll_success_count: 0,
            poll_error_count: 0,
            last_poll_error: None,
            last_poll_error_at: None,
            last_poll_ok_at: None,
            sleeping: false,
            sleep_since: None,
            next_market_open_at: None,
            last_resume_at: None,
            resume_count: 0,
            started_at: None,
            last_tick_at: None,
            tick_count: 0,
            error_reason: None,
        }
    }

    /// 按状态图迁移，同状态视为无操作
    pub fn transition(&mut self, next: RunnerStatus) -> Result<(), InvalidTransition> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.sleeping = next == RunnerStatus::Sleeping;
        Ok(())
    }

    pub fn enter_sleep(
        &mut self,
        now: DateTime<Utc>,
        next_open: Option<DateTime<Utc>>,
    ) -> Result<(), InvalidTransition> {
        let was_sleeping = self.status == RunnerStatus::Sleeping;
        self.transition(RunnerStatus::Sleeping)?;
        if !was_sleeping {
            self.sleep_since = Some(now);
        }
        self.next_market_open_at = next_open;
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(RunnerStatus::Running)?;
        self.sleep_since = None;
        self.next_market_open_at = None;
        self.last_resume_at = Some(now);
        self.resume_count += 1;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(RunnerStatus::Error)?;
        self.error_reason = Some(reason.into());
        self.broker_connected = false;
        Ok(())
    }

    pub fn record_poll_success(&mut self, now: DateTime<Utc>) {
        self.broker_connected = true;
        self.poll_success_count += 1;
        self.last_poll_ok_at = Some(now);
    }

    pub fn record_poll_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.broker_connected = false;
        self.poll_error_count += 1;
        self.last_poll_error = Some(error.into());
        self.last_poll_error_at = Some(now);
    }

    /// 停止后保留策略集合和轮询间隔，其余字段复位
    pub fn reset_on_stop(&mut self) {
        *self = Self::stopped(
            std::mem::take(&mut self.strategy_ids),
            self.tick_interval_secs,
        );
    }
}
