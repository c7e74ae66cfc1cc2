//! Decoding: spatial filters for classification.

pub mod csp;

pub use csp::Csp;
