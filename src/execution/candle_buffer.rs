use crate::models::Candle;
use std::collections::VecDeque;

/// Outcome of pushing a candle into the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New bar appended at the end
    Appended,
    /// Same open time as the last bar, which was overwritten
    Replaced,
    /// Older than the last bar, ignored
    Stale,
}

/// Rolling window of candles for the traded pair
///
/// Sorted by open time ascending; no two candles share an open time.
/// When full, the oldest candle is evicted.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles.min(4096)),
            max_candles: max_candles.max(1),
        }
    }

    /// Add a candle, keeping the window ordered
    pub fn push(&mut self, candle: Candle) -> PushOutcome {
        let outcome = match self.candles.back() {
            Some(last) if candle.open_time < last.open_time => return PushOutcome::Stale,
            Some(last) if candle.open_time == last.open_time => {
                if let Some(slot) = self.candles.back_mut() {
                    *slot = candle;
                }
                return PushOutcome::Replaced;
            }
            _ => PushOutcome::Appended,
        };

        self.candles.push_back(candle);

        // Remove oldest if exceeds max
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }

        outcome
    }

    /// Replace the window with a history batch
    ///
    /// Out-of-order and duplicate entries in the batch are resolved the same
    /// way as live pushes.
    pub fn seed(&mut self, mut candles: Vec<Candle>) -> usize {
        self.candles.clear();
        candles.sort_by_key(|c| c.open_time);
        for candle in candles {
            self.push(candle);
        }
        self.candles.len()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }
}
