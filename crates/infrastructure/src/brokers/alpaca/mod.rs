//! Alpaca REST 接入

pub mod broker;
pub mod calendar;
pub mod client;
pub mod dto;

pub use broker::AlpacaBroker;
pub use calendar::AlpacaCalendar;
pub use client::{AlpacaClient, AlpacaConfig};
