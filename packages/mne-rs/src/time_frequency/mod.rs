//! Time-frequency representations.

pub mod stockwell;

pub use stockwell::{tfr_stockwell, AverageTfr, StockwellParams};
