use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::api::{Exchange, ExchangeError};
use crate::execution::candle_buffer::{CandleBuffer, PushOutcome};
use crate::execution::executor::{ExecutionAction, Executor};
use crate::execution::position_manager::{PositionManager, PositionState};
use crate::indicators::IndicatorSet;
use crate::models::{KlineEvent, Order, OrderSizing, Side, Signal, Trend};
use crate::persistence::OrderStore;
use crate::regime::TrendClassifier;
use crate::reporting::StatusLog;
use crate::strategy::{EmaCrossStrategy, Strategy};
use crate::Result;

/// Settings the trader needs from the process configuration
#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub symbol: String,
    pub quote_asset: String,
    pub interval: String,
    /// Candles requested from history at startup
    pub history_limit: u16,
    pub max_candles: usize,
    pub range_threshold_pct: f64,
    /// Share of the quote balance spent per entry
    pub position_size_pct: f64,
    pub quote_precision: u32,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            symbol: "ETHUSDT".to_string(),
            quote_asset: "USDT".to_string(),
            interval: "1m".to_string(),
            history_limit: 100,
            max_candles: 500,
            range_threshold_pct: crate::regime::DEFAULT_RANGE_THRESHOLD_PCT,
            position_size_pct: 100.0,
            quote_precision: 2,
        }
    }
}

/// What happened to a feed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineOutcome {
    /// Bar still forming
    InProgress,
    WrongSymbol,
    /// Non-finite prices
    Invalid,
    /// Older than the last bar in the window
    Stale,
    /// Same bar delivered again; data refreshed, signals not re-evaluated
    Redelivered,
    Processed,
}

/// Market-event loop for one symbol and one position slot
///
/// Consumes closed candles one at a time, recomputes indicators and trend,
/// and enters/exits the position through the exchange on EMA crossovers.
pub struct Trader {
    exchange: Arc<dyn Exchange>,
    config: TraderConfig,
    window: CandleBuffer,
    indicators: IndicatorSet,
    classifier: TrendClassifier,
    trend: Trend,
    strategy: EmaCrossStrategy,
    executor: Executor,
    positions: PositionManager,
    status: StatusLog,
}

impl Trader {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        store: OrderStore,
        status: StatusLog,
        config: TraderConfig,
    ) -> Self {
        Self {
            exchange,
            window: CandleBuffer::new(config.max_candles),
            indicators: IndicatorSet::default(),
            classifier: TrendClassifier::new(config.range_threshold_pct),
            trend: Trend::Range,
            strategy: EmaCrossStrategy,
            executor: Executor::new(config.position_size_pct, config.quote_precision),
            positions: PositionManager::new(store),
            status,
            config,
        }
    }

    pub fn state(&self) -> PositionState {
        self.positions.state()
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    pub fn open_position(&self) -> Option<&Order> {
        self.positions.open_position()
    }

    pub fn balance(&self) -> f64 {
        self.positions.balance()
    }

    pub fn window(&self) -> &CandleBuffer {
        &self.window
    }

    pub fn indicators(&self) -> &IndicatorSet {
        &self.indicators
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Restore position, sync with the exchange and seed the candle window
    ///
    /// Fails only when the exchange cannot be queried for the balance or the
    /// candle history; everything else is logged and tolerated.
    pub async fn start(&mut self) -> Result<()> {
        let symbol = self.config.symbol.clone();
        self.status.init_log(&format!(
            "Initializing bot on {} with TF: {}",
            symbol, self.config.interval
        ));
        self.status.init_log(&format!(
            "Strategy: {}, range band {}%",
            self.strategy.name(),
            self.classifier.threshold_pct()
        ));

        // 1. Persisted position
        match self.positions.restore() {
            Ok(Some(order)) => self.status.init_log(&format!(
                "Resumed open position: order {} ({} {} @ {})",
                order.order_id, order.side, order.executed_qty, order.price
            )),
            Ok(None) => self.status.init_log("No open position, starting FLAT"),
            Err(e) => self.status.error_log(
                "Persisted order unreadable, starting FLAT (exchange position may differ)",
                &e,
            ),
        }

        // 2. Balance
        let balance = match self.exchange.get_asset_balance(&self.config.quote_asset).await {
            Ok(balance) => balance,
            Err(e) => {
                self.status.error_log("Balance query failed", &e);
                return Err(e.into());
            }
        };
        self.positions.set_balance(balance);
        self.status.init_log(&format!(
            "Account balance: {:.2} {}",
            balance, self.config.quote_asset
        ));

        // 3. Stale resting orders
        self.cancel_stale_orders().await;

        // 4. History
        let candles = match self
            .exchange
            .get_klines(&symbol, &self.config.interval, self.config.history_limit)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                self.status.error_log("Candle history fetch failed", &e);
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let finalized: Vec<_> = candles
            .into_iter()
            .filter(|c| c.close_time <= now && c.is_finite())
            .collect();
        let loaded = self.window.seed(finalized);
        self.status
            .init_log(&format!("Successfully loaded {} candles", loaded));

        let required = self.strategy.min_candles_required();
        if loaded < required {
            self.status.event_log(&format!(
                "Only {} finalized candles available, signals start after {}",
                loaded, required
            ));
        }

        // 5. Indicators and initial trend, no transition entry
        self.indicators = IndicatorSet::compute(&self.window.closes());
        if let (Some(ema_55), Some(last)) = (self.indicators.latest_ema_55(), self.window.last()) {
            self.trend = self.classifier.classify(ema_55, last.close);
            self.status.init_log(&format!(
                "Current trend is: {} [ema55 {:.2}, close {:.2}]",
                self.trend, ema_55, last.close
            ));
        }

        Ok(())
    }

    /// Cancel resting orders on the symbol other than the persisted position
    async fn cancel_stale_orders(&mut self) {
        let keep = self.positions.open_position().map(|o| o.order_id);

        let orders = match self.exchange.get_open_orders(&self.config.symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                self.status.error_log("Could not list open orders", &e);
                return;
            }
        };

        let mut cancelled = 0;
        for order in orders.iter().filter(|o| Some(o.order_id) != keep) {
            match self
                .exchange
                .cancel_order(&self.config.symbol, order.order_id)
                .await
            {
                Ok(()) => {
                    cancelled += 1;
                    self.status.init_log(&format!(
                        "Cancelled stale {} order {} on {}",
                        order.side, order.order_id, order.symbol
                    ));
                }
                Err(e) => self
                    .status
                    .error_log(&format!("Failed to cancel stale order {}", order.order_id), &e),
            }
        }

        if cancelled > 0 {
            tracing::info!(cancelled, "Stale open orders cleaned up");
        }
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Process feed events sequentially until the feed closes or shutdown
    /// is signalled. An event in progress is always finished.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<KlineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Trader stopping");
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            self.on_kline(event).await;
                        }
                        None => {
                            self.status.event_log("Market data feed closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Handle one feed event
    pub async fn on_kline(&mut self, event: KlineEvent) -> KlineOutcome {
        if !event.symbol.eq_ignore_ascii_case(&self.config.symbol) {
            tracing::debug!(symbol = %event.symbol, "Ignoring kline for another symbol");
            return KlineOutcome::WrongSymbol;
        }

        if !event.is_closed {
            return KlineOutcome::InProgress;
        }

        let candle = event.candle;
        if !candle.is_finite() {
            self.status.event_log(&format!(
                "Ignoring malformed candle at {}",
                candle.open_time
            ));
            return KlineOutcome::Invalid;
        }

        let open_time = candle.open_time;
        match self.window.push(candle) {
            PushOutcome::Stale => {
                self.status.event_log(&format!(
                    "Ignoring out-of-order candle at {} (last is {})",
                    open_time,
                    self.window.last().map(|c| c.open_time.to_string()).unwrap_or_default()
                ));
                return KlineOutcome::Stale;
            }
            PushOutcome::Replaced => {
                tracing::debug!(%open_time, "Closed candle delivered again");
                self.indicators = IndicatorSet::compute(&self.window.closes());
                // Trend follows the corrected close; signals wait for the next bar
                if let (Some(ema_55), Some(close)) = (
                    self.indicators.latest_ema_55(),
                    self.window.last().map(|c| c.close),
                ) {
                    if let Some(change) = self.classifier.update(&mut self.trend, ema_55, close) {
                        self.status.trend_log(change.from, change.to);
                    }
                }
                return KlineOutcome::Redelivered;
            }
            PushOutcome::Appended => {}
        }

        self.evaluate().await;
        KlineOutcome::Processed
    }

    /// Recompute indicators and trend, then act on the crossover signal
    async fn evaluate(&mut self) {
        self.indicators = IndicatorSet::compute(&self.window.closes());

        let Some(close) = self.window.last().map(|c| c.close) else {
            return;
        };

        let Some(ema_55) = self.indicators.latest_ema_55() else {
            tracing::debug!(candles = self.window.len(), "Not enough candles for the trend line");
            return;
        };

        if let Some(change) = self.classifier.update(&mut self.trend, ema_55, close) {
            self.status.trend_log(change.from, change.to);
        }

        let signal = self.strategy.generate_signal(&self.indicators);
        let decision = self.executor.process_signal(
            signal,
            self.trend,
            self.positions.open_position(),
            self.positions.balance(),
        );

        if signal != Signal::Hold {
            tracing::info!(
                signal = ?signal,
                trend = %self.trend,
                close,
                rsi = ?self.indicators.latest_rsi(),
                "{}",
                decision.reason
            );
        }

        match decision.action {
            ExecutionAction::Buy { notional } => self.enter_position(notional).await,
            ExecutionAction::Sell { quantity } => self.exit_position(quantity).await,
            ExecutionAction::Skip => {}
        }
    }

    async fn enter_position(&mut self, notional: f64) {
        let result = self
            .exchange
            .create_market_order(&self.config.symbol, Side::Buy, OrderSizing::QuoteNotional(notional))
            .await;

        let order = match result {
            Ok(order) if order.is_filled() => order,
            Ok(order) => {
                self.status.error_log(
                    "BUY order not confirmed",
                    &ExchangeError::Unconfirmed {
                        order_id: order.order_id,
                    },
                );
                return;
            }
            Err(e) => {
                self.status.error_log("BUY order failed", &e);
                return;
            }
        };

        let (price, quantity) = (order.price, order.executed_qty);
        if let Err(e) = self.positions.open_position_with(order) {
            self.status.error_log("Position state", &format!("{:#}", e));
        }
        self.status.buy_log(price, quantity);
    }

    async fn exit_position(&mut self, quantity: f64) {
        let balance_before = self.positions.balance();

        let result = self
            .exchange
            .create_market_order(&self.config.symbol, Side::Sell, OrderSizing::BaseQuantity(quantity))
            .await;

        let order = match result {
            Ok(order) if order.is_filled() => order,
            Ok(order) => {
                self.status.error_log(
                    "SELL order not confirmed",
                    &ExchangeError::Unconfirmed {
                        order_id: order.order_id,
                    },
                );
                return;
            }
            Err(e) => {
                self.status.error_log("SELL order failed", &e);
                return;
            }
        };

        if order.executed_qty < quantity {
            self.status.event_log(&format!(
                "SELL filled {} of {}, remainder stays on the account",
                order.executed_qty, quantity
            ));
        }

        if let Err(e) = self.positions.close_position() {
            self.status.error_log("Position state", &format!("{:#}", e));
        }

        match self.exchange.get_asset_balance(&self.config.quote_asset).await {
            Ok(balance) => {
                self.positions.set_balance(balance);
                self.status
                    .sell_log(order.price, Some(balance - balance_before), balance);
            }
            Err(e) => {
                self.status.error_log("Balance refresh after SELL failed", &e);
                self.status.sell_log(order.price, None, balance_before);
            }
        }
    }
}
