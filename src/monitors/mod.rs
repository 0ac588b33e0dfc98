//! Host inspection and threshold evaluation

pub mod host;
pub mod thresholds;
