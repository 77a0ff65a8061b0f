use crate::indicators::IndicatorSet;
use crate::models::Signal;

/// Fast line crosses above the slow line between the previous and current bar
///
/// Points are `(fast, slow)` pairs.
pub fn is_crossing_up(prev: (f64, f64), curr: (f64, f64)) -> bool {
    prev.0 <= prev.1 && curr.0 > curr.1
}

/// Fast line crosses below the slow line between the previous and current bar
pub fn is_crossing_down(prev: (f64, f64), curr: (f64, f64)) -> bool {
    prev.0 >= prev.1 && curr.0 < curr.1
}

/// Crossover signal on the last two points of the fast/slow EMA pair
///
/// Only the last two bars are compared, so a missed bar can hide a cross.
pub fn crossover_signal(indicators: &IndicatorSet) -> Signal {
    let Some([prev, curr]) = indicators.last_two_fast_slow() else {
        return Signal::Hold;
    };

    if is_crossing_up(prev, curr) {
        Signal::Buy
    } else if is_crossing_down(prev, curr) {
        Signal::Sell
    } else {
        Signal::Hold
    }
}
