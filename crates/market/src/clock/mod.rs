//! 市场时钟

pub mod session_clock;

pub use session_clock::{MarketClock, SessionState};
