//! 应用层: 启动引导与子命令

pub mod bootstrap;
mod commands;

pub use commands::{
    add_strategy, panic_stop, preflight, reset_losses, reset_peak, run_backtest, run_optimize,
    run_runner, set_kill_switch, show_status,
};
