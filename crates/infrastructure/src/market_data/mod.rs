//! 历史行情数据

pub mod csv_bar_source;

pub use csv_bar_source::CsvBarSource;
