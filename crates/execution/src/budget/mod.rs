//! 周预算

pub mod budget_manager;

pub use budget_manager::{BudgetManager, BudgetRejection};
