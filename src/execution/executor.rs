use crate::models::{Order, Signal, Trend};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    /// Market buy spending this much quote currency
    Buy { notional: f64 },
    /// Market sell of this much base asset
    Sell { quantity: f64 },
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Gates crossover signals against position state and trend
///
/// The trend acts as a filter: no entries in a bearish trend, no exits in a
/// bullish one.
#[derive(Debug, Clone)]
pub struct Executor {
    position_size_pct: f64,
    quote_precision: u32,
}

impl Executor {
    pub fn new(position_size_pct: f64, quote_precision: u32) -> Self {
        Self {
            position_size_pct,
            quote_precision,
        }
    }

    /// Process a signal and decide what to do
    pub fn process_signal(
        &self,
        signal: Signal,
        trend: Trend,
        open_position: Option<&Order>,
        balance: f64,
    ) -> ExecutionDecision {
        match signal {
            Signal::Buy => {
                // Check 1: one position slot only
                if let Some(position) = open_position {
                    return ExecutionDecision::skip(format!(
                        "Already have open position (order {})",
                        position.order_id
                    ));
                }

                // Check 2: trend filter
                if trend == Trend::Bearish {
                    return ExecutionDecision::skip("Buy signal ignored - trend is BEARISH");
                }

                // Check 3: size from available quote balance
                let notional = self.calculate_notional(balance);
                if notional <= 0.0 {
                    return ExecutionDecision::skip(format!(
                        "Buy signal ignored - no quote balance ({:.2})",
                        balance
                    ));
                }

                ExecutionDecision {
                    action: ExecutionAction::Buy { notional },
                    reason: format!("EMA cross up in {} trend", trend),
                }
            }

            Signal::Sell => {
                let Some(position) = open_position else {
                    return ExecutionDecision::skip("No position to sell");
                };

                if trend == Trend::Bullish {
                    return ExecutionDecision::skip("Sell signal ignored - trend is BULLISH");
                }

                ExecutionDecision {
                    action: ExecutionAction::Sell {
                        quantity: position.executed_qty,
                    },
                    reason: format!("EMA cross down in {} trend", trend),
                }
            }

            Signal::Hold => ExecutionDecision::skip("Hold signal"),
        }
    }

    /// Quote amount for the next entry, floored to the quote precision
    pub fn calculate_notional(&self, balance: f64) -> f64 {
        if !balance.is_finite() || balance <= 0.0 {
            return 0.0;
        }

        let raw = balance * self.position_size_pct / 100.0;
        let scale = 10f64.powi(self.quote_precision as i32);
        // Settle representation error (4.35 * 100 = 434.99999999999994) before flooring
        let units = (raw * scale * 1e4).round() / 1e4;
        units.floor() / scale
    }
}
