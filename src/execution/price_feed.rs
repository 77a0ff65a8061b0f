use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::models::{Candle, KlineEvent};

pub const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443";

const PING_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Raw kline stream payload
#[derive(Debug, Deserialize)]
struct KlineMessageRaw {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlineRaw,
}

#[derive(Debug, Deserialize)]
struct KlineRaw {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp {} out of range", ms))
}

fn decimal(field: &str, text: &str) -> anyhow::Result<f64> {
    text.parse::<f64>()
        .with_context(|| format!("kline {} is not a number: {:?}", field, text))
}

/// Parse one stream message
///
/// Returns `Ok(None)` for messages that are not kline events (subscription
/// acks and the like).
pub fn parse_kline_message(text: &str) -> anyhow::Result<Option<KlineEvent>> {
    let value: serde_json::Value = serde_json::from_str(text).context("stream message is not JSON")?;
    if value.get("e").and_then(|e| e.as_str()) != Some("kline") {
        return Ok(None);
    }

    let raw: KlineMessageRaw = serde_json::from_value(value).context("malformed kline message")?;
    let k = raw.kline;

    let candle = Candle {
        open_time: millis(k.open_time)?,
        close_time: millis(k.close_time)?,
        open: decimal("open", &k.open)?,
        high: decimal("high", &k.high)?,
        low: decimal("low", &k.low)?,
        close: decimal("close", &k.close)?,
        volume: decimal("volume", &k.volume)?,
    };

    Ok(Some(KlineEvent {
        symbol: raw.symbol,
        candle,
        is_closed: k.is_closed,
    }))
}

/// Streams kline updates for one symbol and interval
///
/// Reconnects with exponential backoff until the receiving side is dropped.
#[derive(Debug, Clone)]
pub struct PriceFeedManager {
    ws_base_url: String,
    symbol: String,
    interval: String,
}

impl PriceFeedManager {
    pub fn new(ws_base_url: impl Into<String>, symbol: &str, interval: &str) -> Self {
        Self {
            ws_base_url: ws_base_url.into().trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        }
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/ws/{}@kline_{}",
            self.ws_base_url,
            self.symbol.to_lowercase(),
            self.interval
        )
    }

    /// Forward kline events into `tx` until it is closed
    pub async fn run(self, tx: mpsc::Sender<KlineEvent>) {
        let url = self.stream_url();
        let mut backoff = INITIAL_BACKOFF;

        while !tx.is_closed() {
            tracing::info!(%url, "Connecting to market data stream");

            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    tracing::info!(symbol = %self.symbol, interval = %self.interval, "Market data stream connected");
                    backoff = INITIAL_BACKOFF;

                    if !Self::pump(ws_stream, &tx).await {
                        return;
                    }
                    tracing::warn!("Market data stream disconnected");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to connect to market data stream");
                }
            }

            if tx.is_closed() {
                break;
            }
            tracing::info!(delay_secs = backoff.as_secs(), "Reconnecting to market data stream");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        tracing::info!("Market data feed stopped");
    }

    /// Read one connection until it drops. Returns false once the consumer
    /// has gone away.
    async fn pump(ws_stream: WsStream, tx: &mpsc::Sender<KlineEvent>) -> bool {
        let (mut write, mut read) = ws_stream.split();
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match parse_kline_message(&text) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                return false;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %format!("{:#}", e), "Dropping malformed stream message"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return true;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::warn!("Stream closed by server");
                        return true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Stream error");
                        return true;
                    }
                    None => return true,
                },
                _ = ping_interval.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        tracing::warn!("Failed to send ping");
                        return true;
                    }
                }
                _ = tx.closed() => return false,
            }
        }
    }
}
