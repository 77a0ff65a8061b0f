/// Exponential Moving Average series aligned with `prices`
///
/// Seeded with the first price (`ema[0] = close[0]`), then
/// `ema[i] = close[i] * k + ema[i-1] * (1 - k)` with `k = 2 / (period + 1)`.
///
/// Values before index `period - 1` are still computed internally but are
/// reported as `None`: they are warm-up values and must not be acted on.
pub fn ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; prices.len()];
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    let mut ema = 0.0;

    for (i, price) in prices.iter().enumerate() {
        ema = if i == 0 {
            *price
        } else {
            price * k + ema * (1.0 - k)
        };

        out.push(if i + 1 >= period { Some(ema) } else { None });
    }

    out
}

/// Latest EMA value, or None until `period` prices are available
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied().flatten()
}
