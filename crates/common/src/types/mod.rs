//! 公共类型定义

pub mod bar;

// 重新导出
pub use bar::Bar;
