use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::execution::TraderConfig;
use crate::indicators::EMA_TREND;

/// Kline intervals accepted by the exchange
pub const VALID_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

/// Largest klines page the exchange serves in one request
pub const MAX_HISTORY_LIMIT: u16 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("missing API credentials (set BINANCE_KEY and BINANCE_SECRET)")]
    MissingCredentials,
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Process settings
///
/// Sources, lowest priority first: built-in defaults, optional config file,
/// `BOT_*` environment variables, then `BINANCE_KEY`/`BINANCE_SECRET`/`PORT`.
#[derive(Clone, Deserialize)]
pub struct Settings {
    pub api_key: String,
    pub api_secret: String,
    pub symbol: String,
    pub quote_asset: String,
    pub interval: String,
    pub range_threshold_pct: f64,
    pub position_size_pct: f64,
    pub quote_precision: u32,
    pub state_file: PathBuf,
    pub http_port: u16,
    pub history_limit: u16,
    pub max_candles: usize,
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub request_timeout_secs: u64,
    pub recv_window_ms: u64,
    pub rate_limit_per_minute: u32,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("symbol", &self.symbol)
            .field("quote_asset", &self.quote_asset)
            .field("interval", &self.interval)
            .field("range_threshold_pct", &self.range_threshold_pct)
            .field("position_size_pct", &self.position_size_pct)
            .field("quote_precision", &self.quote_precision)
            .field("state_file", &self.state_file)
            .field("http_port", &self.http_port)
            .field("history_limit", &self.history_limit)
            .field("max_candles", &self.max_candles)
            .field("rest_base_url", &self.rest_base_url)
            .field("ws_base_url", &self.ws_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish()
    }
}

impl Settings {
    /// Load and validate settings
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder()
            .set_default("api_key", "")?
            .set_default("api_secret", "")?
            .set_default("symbol", "ETHUSDT")?
            .set_default("quote_asset", "USDT")?
            .set_default("interval", "1m")?
            .set_default("range_threshold_pct", crate::regime::DEFAULT_RANGE_THRESHOLD_PCT)?
            .set_default("position_size_pct", 100.0)?
            .set_default("quote_precision", 2)?
            .set_default("state_file", "last_order.json")?
            .set_default("http_port", 8080)?
            .set_default("history_limit", 100)?
            .set_default("max_candles", 500)?
            .set_default("rest_base_url", crate::api::binance::BINANCE_API_BASE)?
            .set_default("ws_base_url", crate::execution::price_feed::BINANCE_WS_BASE)?
            .set_default("request_timeout_secs", 10)?
            .set_default("recv_window_ms", 5000)?
            .set_default("rate_limit_per_minute", 600)?;

        if let Some(path) = config_file {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(::config::Environment::with_prefix("BOT").try_parsing(true))
            .set_override_option("api_key", std::env::var("BINANCE_KEY").ok())?
            .set_override_option("api_secret", std::env::var("BINANCE_SECRET").ok())?
            .set_override_option("http_port", std::env::var("PORT").ok())?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
            return Err(ConfigError::MissingCredentials);
        }

        if self.symbol.trim().is_empty() {
            return Err(invalid("symbol", "must not be empty"));
        }

        if !VALID_INTERVALS.contains(&self.interval.as_str()) {
            return Err(invalid(
                "interval",
                format!("{:?} is not one of {}", self.interval, VALID_INTERVALS.join(", ")),
            ));
        }

        if !(self.range_threshold_pct.is_finite() && self.range_threshold_pct > 0.0) {
            return Err(invalid("range_threshold_pct", "must be a positive number"));
        }

        if !(self.position_size_pct > 0.0 && self.position_size_pct <= 100.0) {
            return Err(invalid("position_size_pct", "must be in (0, 100]"));
        }

        let min_history = EMA_TREND + 1;
        if (self.history_limit as usize) < min_history || self.history_limit > MAX_HISTORY_LIMIT {
            return Err(invalid(
                "history_limit",
                format!("must be between {} and {}", min_history, MAX_HISTORY_LIMIT),
            ));
        }

        if self.max_candles < self.history_limit as usize {
            return Err(invalid("max_candles", "must be at least history_limit"));
        }

        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be positive"));
        }

        if self.rate_limit_per_minute == 0 {
            return Err(invalid("rate_limit_per_minute", "must be positive"));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn trader_config(&self) -> TraderConfig {
        TraderConfig {
            symbol: self.symbol.to_uppercase(),
            quote_asset: self.quote_asset.to_uppercase(),
            interval: self.interval.clone(),
            history_limit: self.history_limit,
            max_candles: self.max_candles,
            range_threshold_pct: self.range_threshold_pct,
            position_size_pct: self.position_size_pct,
            quote_precision: self.quote_precision,
        }
    }
}
