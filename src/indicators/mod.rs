pub mod adx;
pub mod atr;
pub mod rsi;
pub mod sma;

pub use adx::{calculate_adx, AdxReading};
pub use atr::{calculate_atr, calculate_atr_pct};
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;
