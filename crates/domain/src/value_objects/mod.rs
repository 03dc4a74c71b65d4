//! 值对象

pub mod percentage;

pub use percentage::{Percentage, PercentageError};
