// Market trend classification
pub mod trend;

pub use trend::{TrendChange, TrendClassifier, DEFAULT_RANGE_THRESHOLD_PCT};
