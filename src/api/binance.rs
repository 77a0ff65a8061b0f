use super::{Exchange, ExchangeError, ExchangeResult};
use crate::models::{Candle, Order, OrderSizing, OrderStatus, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// Binance Spot REST API
// Docs: https://developers.binance.com/docs/binance-spot-api-docs/rest-api
pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const DEFAULT_RATE_LIMIT_RPM: u32 = 600;
const MAX_RETRIES: u32 = 3;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Binance Spot REST API
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillRaw {
    price: String,
    qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRaw {
    symbol: String,
    order_id: u64,
    client_order_id: String,
    #[serde(default)]
    price: Option<String>,
    executed_qty: String,
    cummulative_quote_qty: String,
    status: OrderStatus,
    side: Side,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    fills: Vec<FillRaw>,
}

#[derive(Debug, Deserialize)]
struct BalanceRaw {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
struct AccountRaw {
    balances: Vec<BalanceRaw>,
}

// ============== Conversions ==============

fn parse_decimal(field: &str, value: &str) -> ExchangeResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| ExchangeError::Decode(format!("invalid {}: {:?}", field, value)))
}

fn millis_to_datetime(ms: i64) -> ExchangeResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ExchangeError::Decode(format!("invalid timestamp {}", ms)))
}

/// Average fill price: fills if present, otherwise quote / base executed
fn average_fill_price(raw: &OrderRaw, executed_qty: f64, quote_qty: f64) -> ExchangeResult<f64> {
    if !raw.fills.is_empty() {
        let mut qty_sum = 0.0;
        let mut notional = 0.0;
        for fill in &raw.fills {
            let qty = parse_decimal("fill qty", &fill.qty)?;
            qty_sum += qty;
            notional += qty * parse_decimal("fill price", &fill.price)?;
        }
        if qty_sum > 0.0 {
            return Ok(notional / qty_sum);
        }
    }

    if executed_qty > 0.0 {
        return Ok(quote_qty / executed_qty);
    }

    match raw.price.as_deref() {
        Some(price) => parse_decimal("price", price),
        None => Ok(0.0),
    }
}

impl TryFrom<OrderRaw> for Order {
    type Error = ExchangeError;

    fn try_from(raw: OrderRaw) -> ExchangeResult<Self> {
        let executed_qty = parse_decimal("executedQty", &raw.executed_qty)?;
        let cumulative_quote_qty = parse_decimal("cummulativeQuoteQty", &raw.cummulative_quote_qty)?;
        let price = average_fill_price(&raw, executed_qty, cumulative_quote_qty)?;
        let transact_time = match raw.transact_time.or(raw.update_time).or(raw.time) {
            Some(ms) => millis_to_datetime(ms)?,
            None => Utc::now(),
        };

        Ok(Order {
            symbol: raw.symbol,
            order_id: raw.order_id,
            client_order_id: raw.client_order_id,
            side: raw.side,
            price,
            executed_qty,
            cumulative_quote_qty,
            status: raw.status,
            transact_time,
        })
    }
}

/// Kline rows are heterogeneous arrays:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`
fn parse_kline_row(row: &[serde_json::Value]) -> ExchangeResult<Candle> {
    if row.len() < 7 {
        return Err(ExchangeError::Decode(format!(
            "kline row has {} fields, expected at least 7",
            row.len()
        )));
    }

    let time_at = |i: usize| -> ExchangeResult<DateTime<Utc>> {
        let ms = row[i]
            .as_i64()
            .ok_or_else(|| ExchangeError::Decode(format!("kline field {} is not a timestamp", i)))?;
        millis_to_datetime(ms)
    };
    let num_at = |i: usize| -> ExchangeResult<f64> {
        match &row[i] {
            serde_json::Value::String(s) => parse_decimal("kline value", s),
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ExchangeError::Decode(format!("kline field {} out of range", i))),
            other => Err(ExchangeError::Decode(format!(
                "kline field {} has unexpected type: {}",
                i, other
            ))),
        }
    };

    Ok(Candle {
        open_time: time_at(0)?,
        open: num_at(1)?,
        high: num_at(2)?,
        low: num_at(3)?,
        close: num_at(4)?,
        volume: num_at(5)?,
        close_time: time_at(6)?,
    })
}

/// Plain decimal text accepted by the order endpoint
pub fn format_decimal(value: f64) -> String {
    let text = format!("{:.8}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> ExchangeResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Decode(format!("{} (body: {})", e, body)));
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return Err(ExchangeError::RateLimited {
            status: status.as_u16(),
        });
    }

    match serde_json::from_str::<ApiErrorBody>(&body) {
        // -2014: bad API key format, -2015: invalid key / IP / permissions
        Ok(err) if status == StatusCode::UNAUTHORIZED || matches!(err.code, -2014 | -2015) => {
            Err(ExchangeError::Unauthorized(err.msg))
        }
        Ok(err) => Err(ExchangeError::Rejected {
            code: err.code,
            msg: err.msg,
        }),
        Err(_) if status.is_server_error() => Err(ExchangeError::Transport(format!(
            "HTTP {}: {}",
            status, body
        ))),
        Err(_) => Err(ExchangeError::Rejected {
            code: status.as_u16() as i64,
            msg: body,
        }),
    }
}

// ============== Implementation ==============

impl BinanceClient {
    pub fn new(api_key: String, api_secret: String, timeout: Duration) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: BINANCE_API_BASE.to_string(),
            api_key,
            api_secret,
            recv_window_ms: 5000,
            rate_limiter: Arc::new(Self::limiter(DEFAULT_RATE_LIMIT_RPM)),
        })
    }

    fn limiter(requests_per_minute: u32) -> BinanceRateLimiter {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_minute(rpm))
    }

    /// Point the client at another deployment (e.g. the spot testnet)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limiter = Arc::new(Self::limiter(requests_per_minute));
        self
    }

    fn endpoint(&self, path: &str) -> ExchangeResult<Url> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ExchangeError::Transport(format!("invalid url: {}", e)))
    }

    fn sign(&self, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Unauthorized(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Unsigned market-data GET
    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));

        self.rate_limiter.until_ready().await;
        let response = self.client.get(url).send().await?;
        decode_response(response).await
    }

    /// Signed (USER_DATA / TRADE) request
    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .append_pair("recvWindow", &self.recv_window_ms.to_string())
            .append_pair("timestamp", &Utc::now().timestamp_millis().to_string());

        let signature = self.sign(url.query().unwrap_or_default())?;
        url.query_pairs_mut().append_pair("signature", &signature);

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        decode_response(response).await
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    /// Endpoint: GET /api/v3/klines
    ///
    /// Retried with exponential backoff on transient failures.
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u16) -> ExchangeResult<Vec<Candle>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];

        let mut attempt = 0;
        let rows: Vec<Vec<serde_json::Value>> = loop {
            attempt += 1;
            match self.public_get("/api/v3/klines", &params).await {
                Ok(rows) => break rows,
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Kline fetch failed: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => return Err(e),
            }
        };

        rows.iter().map(|row| parse_kline_row(row)).collect()
    }

    /// Endpoint: GET /api/v3/openOrders (signed)
    async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<Order>> {
        let raw: Vec<OrderRaw> = self
            .signed_request(Method::GET, "/api/v3/openOrders", &[("symbol", symbol.to_string())])
            .await?;
        raw.into_iter().map(Order::try_from).collect()
    }

    /// Endpoint: DELETE /api/v3/order (signed)
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::DELETE,
                "/api/v3/order",
                &[("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Endpoint: POST /api/v3/order (signed), full response with fills
    ///
    /// Market orders are never retried here: a timeout does not prove the
    /// order was not placed.
    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        sizing: OrderSizing,
    ) -> ExchangeResult<Order> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("newOrderRespType", "FULL".to_string()),
            ("newClientOrderId", uuid::Uuid::new_v4().simple().to_string()),
        ];
        match sizing {
            OrderSizing::QuoteNotional(amount) => params.push(("quoteOrderQty", format_decimal(amount))),
            OrderSizing::BaseQuantity(qty) => params.push(("quantity", format_decimal(qty))),
        }

        let raw: OrderRaw = self
            .signed_request(Method::POST, "/api/v3/order", &params)
            .await?;
        let order = Order::try_from(raw)?;

        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            order_id = order.order_id,
            executed_qty = order.executed_qty,
            price = order.price,
            "Market order placed"
        );

        Ok(order)
    }

    /// Endpoint: GET /api/v3/account (signed)
    async fn get_asset_balance(&self, asset: &str) -> ExchangeResult<f64> {
        let account: AccountRaw = self
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await?;

        match account.balances.iter().find(|b| b.asset == asset) {
            Some(balance) => parse_decimal("free balance", &balance.free),
            None => Ok(0.0),
        }
    }
}
