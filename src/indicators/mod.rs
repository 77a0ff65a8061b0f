// Technical indicators module
// EMA(8/21/55) and RSI(14), recomputed over the full candle window

pub mod indicator_set;
pub mod moving_average;
pub mod rsi;

pub use indicator_set::{IndicatorSet, EMA_FAST, EMA_SLOW, EMA_TREND, RSI_PERIOD};
pub use moving_average::{calculate_ema, ema_series};
pub use rsi::{calculate_rsi, rsi_series};
