use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candlestick for the traded pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// All price/volume fields are finite numbers
    pub fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Kline update delivered by the market data feed
#[derive(Debug, Clone, PartialEq)]
pub struct KlineEvent {
    pub symbol: String,
    pub candle: Candle,
    /// True once the bar's time window has fully elapsed
    pub is_closed: bool,
}

/// Trading signal derived from indicator crossovers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange-side order status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    ExpiredInMatch,
    #[serde(other)]
    Unknown,
}

/// How a market order is sized
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSizing {
    /// Spend this amount of the quote currency
    QuoteNotional(f64),
    /// Sell/buy exactly this amount of the base asset
    BaseQuantity(f64),
}

/// The exchange's record of an order and its execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub side: Side,
    /// Average fill price confirmed by the exchange
    pub price: f64,
    pub executed_qty: f64,
    pub cumulative_quote_qty: f64,
    pub status: OrderStatus,
    pub transact_time: DateTime<Utc>,
}

impl Order {
    /// Exchange confirmed at least a partial execution
    pub fn is_filled(&self) -> bool {
        self.executed_qty > 0.0
    }
}

/// Market trend derived from the EMA-55 trend line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Trend {
    #[default]
    Range,
    Bullish,
    Bearish,
}

impl Trend {
    pub fn name(&self) -> &'static str {
        match self {
            Trend::Range => "RANGE",
            Trend::Bullish => "BULLISH",
            Trend::Bearish => "BEARISH",
        }
    }

    /// Display colour on the status page
    pub fn color(&self) -> &'static str {
        match self {
            Trend::Range => "orange",
            Trend::Bullish => "green",
            Trend::Bearish => "red",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order {
            symbol: "ETHUSDT".to_string(),
            order_id: 42,
            client_order_id: "abc".to_string(),
            side: Side::Buy,
            price: 2000.0,
            executed_qty: 0.5,
            cumulative_quote_qty: 1000.0,
            status: OrderStatus::Filled,
            transact_time: Utc::now(),
        }
    }

    #[test]
    fn test_order_json_roundtrip() {
        let order = sample_order();
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"BUY\""));
        assert!(json.contains("\"FILLED\""));

        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let status: OrderStatus = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(status, OrderStatus::Unknown);
        let status: OrderStatus = serde_json::from_str("\"PARTIALLY_FILLED\"").unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn test_is_filled() {
        let mut order = sample_order();
        assert!(order.is_filled());
        order.executed_qty = 0.0;
        assert!(!order.is_filled());
    }

    #[test]
    fn test_trend_default_is_range() {
        assert_eq!(Trend::default(), Trend::Range);
        assert_eq!(Trend::Bearish.to_string(), "BEARISH");
    }
}
