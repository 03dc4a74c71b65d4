use dip_quant_common::AppError;
use dip_quant_domain::entities::InvalidTransition;
use thiserror::Error;

/// 运行器命令错误，命令执行时同步返回给操作方
#[derive(Error, Debug)]
pub enum RunnerCommandError {
    #[error("没有启用的策略，无法启动")]
    NoActiveStrategies,

    #[error("总开关已打开，无法启动: {0}")]
    KillSwitchEngaged(String),

    #[error("运行器处于 ERROR 状态 ({0})，需要先停止再启动")]
    InErrorState(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    App(#[from] AppError),
}
