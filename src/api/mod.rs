pub mod binance;

pub use binance::BinanceClient;

use crate::models::{Candle, Order, OrderSizing, Side};
use async_trait::async_trait;

/// Errors returned by the exchange capability
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("rate limited by exchange (HTTP {status})")]
    RateLimited { status: u16 },
    #[error("exchange rejected request ({code}): {msg}")]
    Rejected { code: i64, msg: String },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unexpected exchange response: {0}")]
    Decode(String),
    #[error("order {order_id} was accepted but not filled")]
    Unconfirmed { order_id: u64 },
}

impl ExchangeError {
    /// Worth retrying later without changing the request
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Transport(_) | ExchangeError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else {
            ExchangeError::Transport(e.to_string())
        }
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Spot exchange operations needed by the trader
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Most recent candles, oldest first. May include the still-forming bar.
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u16) -> ExchangeResult<Vec<Candle>>;

    async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<Order>>;

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ExchangeResult<()>;

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        sizing: OrderSizing,
    ) -> ExchangeResult<Order>;

    /// Free balance of an asset
    async fn get_asset_balance(&self, asset: &str) -> ExchangeResult<f64>;
}
