// Trading strategy module
pub mod ema_cross;
pub mod signals;

pub use ema_cross::EmaCrossStrategy;

use crate::indicators::IndicatorSet;
use crate::models::Signal;

/// Base trait for trading strategies
pub trait Strategy: Send + Sync {
    /// Generate a trading signal from the indicators of the current window
    fn generate_signal(&self, indicators: &IndicatorSet) -> Signal;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required before the strategy may act
    fn min_candles_required(&self) -> usize;
}
