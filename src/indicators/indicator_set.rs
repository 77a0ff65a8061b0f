use super::rsi::rsi_from_averages;

pub const EMA_FAST: usize = 8;
pub const EMA_SLOW: usize = 21;
pub const EMA_TREND: usize = 55;
pub const RSI_PERIOD: usize = 14;

const EMA_PERIODS: [usize; 3] = [EMA_FAST, EMA_SLOW, EMA_TREND];

/// Indicator series derived from a candle window
///
/// Every series has the same length and index alignment as the window it was
/// computed from. `None` marks warm-up values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndicatorSet {
    pub ema_8: Vec<Option<f64>>,
    pub ema_21: Vec<Option<f64>>,
    pub ema_55: Vec<Option<f64>>,
    pub rsi_14: Vec<Option<f64>>,
    carry: Carry,
}

// Recurrence state after the last bar, including warm-up values that the
// public series hide
#[derive(Debug, Clone, PartialEq, Default)]
struct Carry {
    bars: usize,
    prev_close: f64,
    ema: [f64; 3],
    avg_gain: f64,
    avg_loss: f64,
}

impl IndicatorSet {
    /// Full recompute over a series of closing prices
    pub fn compute(closes: &[f64]) -> Self {
        let mut set = Self::default();
        for &close in closes {
            set.extend(close);
        }
        set
    }

    /// Append one bar without recomputing the earlier ones
    ///
    /// Produces exactly the values `compute` would for the extended series.
    pub fn extend(&mut self, close: f64) {
        let i = self.carry.bars;

        for (slot, period) in EMA_PERIODS.iter().enumerate() {
            let k = 2.0 / (*period as f64 + 1.0);
            let ema = &mut self.carry.ema[slot];
            *ema = if i == 0 {
                close
            } else {
                close * k + *ema * (1.0 - k)
            };
            let value = if i + 1 >= *period { Some(*ema) } else { None };
            match slot {
                0 => self.ema_8.push(value),
                1 => self.ema_21.push(value),
                _ => self.ema_55.push(value),
            }
        }

        let rsi = self.step_rsi(i, close);
        self.rsi_14.push(rsi);

        self.carry.prev_close = close;
        self.carry.bars += 1;
    }

    // Same Wilder smoothing as `rsi_series`
    fn step_rsi(&mut self, i: usize, close: f64) -> Option<f64> {
        if i == 0 {
            return None;
        }

        let change = close - self.carry.prev_close;
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, change.abs())
        };

        let period = RSI_PERIOD as f64;
        let carry = &mut self.carry;
        if i <= RSI_PERIOD {
            carry.avg_gain += gain;
            carry.avg_loss += loss;
            if i < RSI_PERIOD {
                return None;
            }
            carry.avg_gain /= period;
            carry.avg_loss /= period;
        } else {
            carry.avg_gain = (carry.avg_gain * (period - 1.0) + gain) / period;
            carry.avg_loss = (carry.avg_loss * (period - 1.0) + loss) / period;
        }

        Some(rsi_from_averages(carry.avg_gain, carry.avg_loss))
    }

    pub fn len(&self) -> usize {
        self.ema_8.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ema_8.is_empty()
    }

    pub fn latest_ema_55(&self) -> Option<f64> {
        self.ema_55.last().copied().flatten()
    }

    pub fn latest_rsi(&self) -> Option<f64> {
        self.rsi_14.last().copied().flatten()
    }

    /// Last two points of the fast and slow EMA as `(fast, slow)` pairs,
    /// `[previous, current]`. None until both are defined on both bars.
    pub fn last_two_fast_slow(&self) -> Option<[(f64, f64); 2]> {
        let n = self.len();
        if n < 2 {
            return None;
        }

        let prev = (self.ema_8[n - 2]?, self.ema_21[n - 2]?);
        let curr = (self.ema_8[n - 1]?, self.ema_21[n - 1]?);
        Some([prev, curr])
    }
}
