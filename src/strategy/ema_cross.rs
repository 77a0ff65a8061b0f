use super::{signals::crossover_signal, Strategy};
use crate::indicators::{IndicatorSet, EMA_TREND};
use crate::models::Signal;

/// EMA-8 / EMA-21 crossover strategy
///
/// Buy when the fast EMA crosses above the slow EMA, sell when it crosses
/// below. Trend filtering is applied later by the executor.
#[derive(Debug, Clone, Default)]
pub struct EmaCrossStrategy;

impl Strategy for EmaCrossStrategy {
    fn generate_signal(&self, indicators: &IndicatorSet) -> Signal {
        if indicators.len() < self.min_candles_required() {
            return Signal::Hold;
        }
        crossover_signal(indicators)
    }

    fn name(&self) -> &str {
        "ema_cross"
    }

    /// The trend filter needs EMA-55, plus one bar to compare against
    fn min_candles_required(&self) -> usize {
        EMA_TREND + 1
    }
}
