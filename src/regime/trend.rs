/// Trend classifier using the distance between price and the EMA-55 trend line
///
/// - distance below the threshold → Range
/// - trend line above price → Bearish
/// - otherwise → Bullish

use crate::models::Trend;

pub const DEFAULT_RANGE_THRESHOLD_PCT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendChange {
    pub from: Trend,
    pub to: Trend,
}

#[derive(Debug, Clone)]
pub struct TrendClassifier {
    threshold_pct: f64,
}

impl Default for TrendClassifier {
    fn default() -> Self {
        Self {
            threshold_pct: DEFAULT_RANGE_THRESHOLD_PCT,
        }
    }
}

impl TrendClassifier {
    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct }
    }

    pub fn threshold_pct(&self) -> f64 {
        self.threshold_pct
    }

    /// Percentage distance between the trend line and the close
    pub fn distance_pct(trend_line: f64, close: f64) -> f64 {
        (trend_line - close).abs() / close * 100.0
    }

    pub fn classify(&self, trend_line: f64, close: f64) -> Trend {
        // No meaningful distance without a positive price
        if !(close > 0.0) || !close.is_finite() || !trend_line.is_finite() {
            return Trend::Range;
        }

        let percent = Self::distance_pct(trend_line, close);
        if percent < self.threshold_pct {
            Trend::Range
        } else if trend_line > close {
            Trend::Bearish
        } else {
            Trend::Bullish
        }
    }

    /// Reclassify and store into `current`, returning the transition if the
    /// value changed.
    pub fn update(&self, current: &mut Trend, trend_line: f64, close: f64) -> Option<TrendChange> {
        let next = self.classify(trend_line, close);

        tracing::debug!(
            trend = %next,
            trend_line,
            close,
            distance_pct = Self::distance_pct(trend_line, close),
            "Classified trend"
        );

        if next == *current {
            return None;
        }

        let change = TrendChange {
            from: *current,
            to: next,
        };
        *current = next;
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_threshold_is_range() {
        let classifier = TrendClassifier::new(0.3);
        // 0.2% away
        assert_eq!(classifier.classify(100.2, 100.0), Trend::Range);
        assert_eq!(classifier.classify(99.8, 100.0), Trend::Range);
    }

    #[test]
    fn test_trend_line_above_price_is_bearish() {
        let classifier = TrendClassifier::new(0.3);
        assert_eq!(classifier.classify(101.0, 100.0), Trend::Bearish);
    }

    #[test]
    fn test_trend_line_below_price_is_bullish() {
        let classifier = TrendClassifier::new(0.3);
        assert_eq!(classifier.classify(99.0, 100.0), Trend::Bullish);
    }

    #[test]
    fn test_threshold_boundary_is_not_range() {
        let classifier = TrendClassifier::new(1.0);
        // exactly 1% is not strictly below the threshold
        assert_eq!(classifier.classify(99.0, 100.0), Trend::Bullish);
    }

    #[test]
    fn test_degenerate_price_is_range() {
        let classifier = TrendClassifier::default();
        assert_eq!(classifier.classify(100.0, 0.0), Trend::Range);
        assert_eq!(classifier.classify(f64::NAN, 100.0), Trend::Range);
    }

    #[test]
    fn test_update_reports_only_changes() {
        let classifier = TrendClassifier::new(0.5);
        let mut trend = Trend::Range;

        assert!(classifier.update(&mut trend, 100.1, 100.0).is_none());
        assert_eq!(trend, Trend::Range);

        let change = classifier.update(&mut trend, 102.0, 100.0).unwrap();
        assert_eq!(change.from, Trend::Range);
        assert_eq!(change.to, Trend::Bearish);
        assert_eq!(trend, Trend::Bearish);

        assert!(classifier.update(&mut trend, 103.0, 100.0).is_none());

        let change = classifier.update(&mut trend, 97.0, 100.0).unwrap();
        assert_eq!(change.from, Trend::Bearish);
        assert_eq!(change.to, Trend::Bullish);
    }
}
