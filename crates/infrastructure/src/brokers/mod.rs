//! 券商适配器

pub mod alpaca;
pub mod paper_broker;

pub use alpaca::{AlpacaBroker, AlpacaCalendar, AlpacaConfig};
pub use paper_broker::{PaperBroker, PaperFault};
