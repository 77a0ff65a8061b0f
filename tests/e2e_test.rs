use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use trendbot::api::{Exchange, ExchangeError, ExchangeResult};
use trendbot::execution::{KlineOutcome, PositionState, Trader, TraderConfig};
use trendbot::persistence::OrderStore;
use trendbot::reporting::{LogCategory, StatusLog};
use trendbot::*;

// ============================================================================
// In-memory exchange
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Klines(u16),
    OpenOrders,
    Cancel(u64),
    Market(Side, OrderSizing),
    Balance(String),
}

struct MockState {
    klines: Vec<Candle>,
    open_orders: Vec<Order>,
    balance: f64,
    fill_price: f64,
    next_order_id: u64,
    failing_orders: usize,
    unfilled_orders: usize,
    fail_klines: bool,
    fail_balance: bool,
    calls: Vec<Call>,
}

struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    fn new(klines: Vec<Candle>, balance: f64) -> Self {
        Self {
            state: Mutex::new(MockState {
                klines,
                open_orders: Vec::new(),
                balance,
                fill_price: 100.0,
                next_order_id: 1000,
                failing_orders: 0,
                unfilled_orders: 0,
                fail_klines: false,
                fail_balance: false,
                calls: Vec::new(),
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    fn market_calls(&self) -> Vec<(Side, OrderSizing)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Market(side, sizing) => Some((side, sizing)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get_klines(&self, _symbol: &str, _interval: &str, limit: u16) -> ExchangeResult<Vec<Candle>> {
        self.with(|s| {
            s.calls.push(Call::Klines(limit));
            if s.fail_klines {
                return Err(ExchangeError::Transport("connection reset".to_string()));
            }
            Ok(s.klines.clone())
        })
    }

    async fn get_open_orders(&self, _symbol: &str) -> ExchangeResult<Vec<Order>> {
        self.with(|s| {
            s.calls.push(Call::OpenOrders);
            Ok(s.open_orders.clone())
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: u64) -> ExchangeResult<()> {
        self.with(|s| {
            s.calls.push(Call::Cancel(order_id));
            s.open_orders.retain(|o| o.order_id != order_id);
            Ok(())
        })
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        sizing: OrderSizing,
    ) -> ExchangeResult<Order> {
        self.with(|s| {
            s.calls.push(Call::Market(side, sizing));

            if s.failing_orders > 0 {
                s.failing_orders -= 1;
                return Err(ExchangeError::Rejected {
                    code: -2010,
                    msg: "Account has insufficient balance".to_string(),
                });
            }

            s.next_order_id += 1;
            let price = s.fill_price;
            let (executed_qty, quote) = if s.unfilled_orders > 0 {
                s.unfilled_orders -= 1;
                (0.0, 0.0)
            } else {
                match sizing {
                    OrderSizing::QuoteNotional(notional) => (notional / price, notional),
                    OrderSizing::BaseQuantity(qty) => (qty, qty * price),
                }
            };

            match side {
                Side::Buy => s.balance -= quote,
                Side::Sell => s.balance += quote,
            }

            Ok(Order {
                symbol: symbol.to_string(),
                order_id: s.next_order_id,
                client_order_id: format!("mock-{}", s.next_order_id),
                side,
                price: if executed_qty > 0.0 { price } else { 0.0 },
                executed_qty,
                cumulative_quote_qty: quote,
                status: if executed_qty > 0.0 {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Expired
                },
                transact_time: Utc::now(),
            })
        })
    }

    async fn get_asset_balance(&self, asset: &str) -> ExchangeResult<f64> {
        self.with(|s| {
            s.calls.push(Call::Balance(asset.to_string()));
            if s.fail_balance {
                return Err(ExchangeError::Unauthorized("Invalid API-key".to_string()));
            }
            Ok(s.balance)
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn bar_open(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i)
}

fn candle(i: i64, close: f64) -> Candle {
    let open_time = bar_open(i);
    Candle {
        open_time,
        close_time: open_time + Duration::seconds(59),
        open: close,
        high: close,
        low: close,
        close,
        volume: 10.0,
    }
}

fn closed(i: i64, close: f64) -> KlineEvent {
    KlineEvent {
        symbol: "ETHUSDT".to_string(),
        candle: candle(i, close),
        is_closed: true,
    }
}

/// 58 bars drifting down 0.01 per bar; fast EMA sits just under the slow one
fn declining_history() -> Vec<Candle> {
    (0..58).map(|i| candle(i, 100.0 - 0.01 * i as f64)).collect()
}

// Bar 58 crosses the fast EMA above the slow one, bar 61 crosses it back
// below and pushes the close more than 1% under EMA-55
const CROSS_UP: (i64, f64) = (58, 100.43);
const FOLLOW_THROUGH: [(i64, f64); 2] = [(59, 100.48), (60, 99.0)];
const CROSS_DOWN: (i64, f64) = (61, 98.5);
const CROSS_UP_AGAIN: (i64, f64) = (62, 100.5);

fn config(range_threshold_pct: f64) -> TraderConfig {
    TraderConfig {
        range_threshold_pct,
        ..TraderConfig::default()
    }
}

fn store_in(dir: &tempfile::TempDir) -> OrderStore {
    OrderStore::new(dir.path().join("last_order.json"))
}

fn trader_with(
    exchange: &Arc<MockExchange>,
    dir: &tempfile::TempDir,
    range_threshold_pct: f64,
) -> (Trader, StatusLog) {
    let status = StatusLog::new();
    let trader = Trader::new(
        exchange.clone(),
        store_in(dir),
        status.clone(),
        config(range_threshold_pct),
    );
    (trader, status)
}

fn entries_with(status: &StatusLog, category: LogCategory) -> Vec<String> {
    status
        .entries()
        .into_iter()
        .filter(|e| e.category == category)
        .map(|e| e.message)
        .collect()
}

fn persisted_order(order_id: u64) -> Order {
    Order {
        symbol: "ETHUSDT".to_string(),
        order_id,
        client_order_id: format!("restored-{}", order_id),
        side: Side::Buy,
        price: 99.5,
        executed_qty: 10.0,
        cumulative_quote_qty: 995.0,
        status: OrderStatus::Filled,
        transact_time: Utc::now(),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_startup_seeds_window_and_trend() {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);

    trader.start().await.unwrap();

    assert_eq!(trader.state(), PositionState::Flat);
    assert_eq!(trader.window().len(), 58);
    assert_eq!(trader.indicators().len(), 58);
    assert_eq!(trader.trend(), Trend::Range);
    assert_eq!(trader.balance(), 1000.0);
    assert!(exchange.calls().contains(&Call::Klines(100)));

    let init = entries_with(&status, LogCategory::Initialization);
    assert!(init.iter().any(|m| m.contains("Strategy: ema_cross, range band 1%")));
    assert!(init.iter().any(|m| m.contains("Successfully loaded 58 candles")));
    assert!(init.iter().any(|m| m.contains("Current trend is: RANGE")));
    // Initial classification is not a transition
    assert!(entries_with(&status, LogCategory::Event)
        .iter()
        .all(|m| !m.contains("trend change")));
}

#[tokio::test]
async fn test_crossover_buy_then_sell() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    exchange.with(|s| s.fill_price = CROSS_UP.1);
    let outcome = trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await;
    assert_eq!(outcome, KlineOutcome::Processed);

    assert_eq!(trader.state(), PositionState::Long);
    assert_eq!(trader.trend(), Trend::Range);
    assert_eq!(
        exchange.market_calls(),
        vec![(Side::Buy, OrderSizing::QuoteNotional(1000.0))]
    );

    let bought = trader.open_position().unwrap().clone();
    assert_eq!(bought.price, CROSS_UP.1);
    assert_eq!(store_in(&dir).load(), Some(bought.clone()));

    let trades = entries_with(&status, LogCategory::Trade);
    assert_eq!(trades.len(), 1);
    assert!(trades[0].contains("BUY"));
    assert!(trades[0].contains("100.43$"));

    for (i, close) in FOLLOW_THROUGH {
        trader.on_kline(closed(i, close)).await;
        assert_eq!(trader.state(), PositionState::Long);
    }

    exchange.with(|s| s.fill_price = CROSS_DOWN.1);
    trader.on_kline(closed(CROSS_DOWN.0, CROSS_DOWN.1)).await;

    assert_eq!(trader.state(), PositionState::Flat);
    assert_eq!(trader.trend(), Trend::Bearish);
    assert!(store_in(&dir).load().is_none());

    let markets = exchange.market_calls();
    assert_eq!(markets.len(), 2);
    assert_eq!(
        markets[1],
        (Side::Sell, OrderSizing::BaseQuantity(bought.executed_qty))
    );

    let expected_balance = bought.executed_qty * CROSS_DOWN.1;
    assert!((trader.balance() - expected_balance).abs() < 1e-9);

    // Trend transition is logged before the exit it allowed
    let entries = status.entries();
    let trend_at = entries
        .iter()
        .position(|e| e.message.contains("trend change"))
        .unwrap();
    let sell_at = entries
        .iter()
        .position(|e| e.category == LogCategory::Trade && e.message.contains("SELL"))
        .unwrap();
    assert!(trend_at < sell_at);
    assert!(entries[trend_at].message.contains("RANGE"));
    assert!(entries[trend_at].message.contains("BEARISH"));

    let pnl = expected_balance - 1000.0;
    assert!(pnl < 0.0);
    assert!(entries[sell_at].message.contains(&format!("{:.2}$", pnl)));
}

#[tokio::test]
async fn test_resume_long_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    store_in(&dir).save(&persisted_order(5)).unwrap();

    let exchange = Arc::new(MockExchange::new(declining_history(), 0.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    assert_eq!(trader.state(), PositionState::Long);
    assert_eq!(trader.open_position().unwrap().order_id, 5);
    assert!(entries_with(&status, LogCategory::Initialization)
        .iter()
        .any(|m| m.contains("Resumed open position")));

    // Cross up while already long does nothing
    trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await;
    assert!(exchange.market_calls().is_empty());
    assert_eq!(trader.state(), PositionState::Long);
}

#[tokio::test]
async fn test_corrupt_store_starts_flat() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("last_order.json"), "{\"symbol\": \"ETH").unwrap();

    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    assert_eq!(trader.state(), PositionState::Flat);
    let errors = entries_with(&status, LogCategory::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("starting FLAT"));
}

#[tokio::test]
async fn test_failed_buy_stays_flat_until_next_cross() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    exchange.with(|s| s.failing_orders = 1);
    // Wide range band keeps the trend filter out of the way
    let (mut trader, status) = trader_with(&exchange, &dir, 5.0);
    trader.start().await.unwrap();

    trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await;
    assert_eq!(trader.state(), PositionState::Flat);
    assert!(store_in(&dir).load().is_none());
    let errors = entries_with(&status, LogCategory::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("BUY order failed"));
    assert!(errors[0].contains("insufficient balance"));

    for (i, close) in FOLLOW_THROUGH {
        trader.on_kline(closed(i, close)).await;
    }
    // Sell cross with no position is skipped
    trader.on_kline(closed(CROSS_DOWN.0, CROSS_DOWN.1)).await;
    assert_eq!(exchange.market_calls().len(), 1);

    trader.on_kline(closed(CROSS_UP_AGAIN.0, CROSS_UP_AGAIN.1)).await;
    assert_eq!(trader.state(), PositionState::Long);
    assert_eq!(exchange.market_calls().len(), 2);
    assert_eq!(entries_with(&status, LogCategory::Trade).len(), 1);
}

#[tokio::test]
async fn test_failed_sell_stays_long() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    exchange.with(|s| s.fill_price = CROSS_UP.1);
    trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await;
    let bought = trader.open_position().unwrap().clone();

    for (i, close) in FOLLOW_THROUGH {
        trader.on_kline(closed(i, close)).await;
    }
    exchange.with(|s| s.failing_orders = 1);
    trader.on_kline(closed(CROSS_DOWN.0, CROSS_DOWN.1)).await;

    assert_eq!(exchange.market_calls().len(), 2);
    assert_eq!(trader.state(), PositionState::Long);
    assert_eq!(trader.open_position(), Some(&bought));
    assert_eq!(store_in(&dir).load(), Some(bought));

    let errors = entries_with(&status, LogCategory::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("SELL order failed"));
    let trades = entries_with(&status, LogCategory::Trade);
    assert_eq!(trades.len(), 1);
    assert!(trades[0].contains("BUY"));
}

#[tokio::test]
async fn test_sell_with_unknown_balance_still_goes_flat() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    exchange.with(|s| s.fill_price = CROSS_UP.1);
    trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await;
    for (i, close) in FOLLOW_THROUGH {
        trader.on_kline(closed(i, close)).await;
    }

    exchange.with(|s| {
        s.fill_price = CROSS_DOWN.1;
        s.fail_balance = true;
    });
    trader.on_kline(closed(CROSS_DOWN.0, CROSS_DOWN.1)).await;

    assert_eq!(trader.state(), PositionState::Flat);
    assert!(store_in(&dir).load().is_none());
    assert!(entries_with(&status, LogCategory::Error)
        .iter()
        .any(|m| m.contains("Balance refresh after SELL failed")));

    let trades = entries_with(&status, LogCategory::Trade);
    assert_eq!(trades.len(), 2);
    assert!(trades[1].contains("SELL"));
    assert!(trades[1].contains("unknown"));
}

#[tokio::test]
async fn test_unfilled_buy_is_not_a_position() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    exchange.with(|s| s.unfilled_orders = 1);
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await;

    assert_eq!(trader.state(), PositionState::Flat);
    assert!(entries_with(&status, LogCategory::Trade).is_empty());
    assert!(entries_with(&status, LogCategory::Error)[0].contains("not filled"));
}

#[tokio::test]
async fn test_ignored_events() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, _status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    let mut forming = closed(CROSS_UP.0, CROSS_UP.1);
    forming.is_closed = false;
    assert_eq!(trader.on_kline(forming).await, KlineOutcome::InProgress);

    let mut other = closed(CROSS_UP.0, CROSS_UP.1);
    other.symbol = "BTCUSDT".to_string();
    assert_eq!(trader.on_kline(other).await, KlineOutcome::WrongSymbol);

    let mut broken = closed(CROSS_UP.0, f64::NAN);
    broken.candle.open = 100.0;
    assert_eq!(trader.on_kline(broken).await, KlineOutcome::Invalid);

    assert_eq!(trader.on_kline(closed(10, 99.0)).await, KlineOutcome::Stale);

    assert_eq!(trader.window().len(), 58);
    assert!(exchange.market_calls().is_empty());
    assert_eq!(trader.state(), PositionState::Flat);
}

#[tokio::test]
async fn test_redelivered_bar_does_not_trade_twice() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, _status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    exchange.with(|s| s.fill_price = CROSS_UP.1);
    assert_eq!(
        trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await,
        KlineOutcome::Processed
    );
    assert_eq!(
        trader.on_kline(closed(CROSS_UP.0, CROSS_UP.1)).await,
        KlineOutcome::Redelivered
    );

    assert_eq!(trader.window().len(), 59);
    assert_eq!(exchange.market_calls().len(), 1);
}

#[tokio::test]
async fn test_corrected_redelivery_updates_trend() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    assert_eq!(trader.on_kline(closed(58, 99.4)).await, KlineOutcome::Processed);
    assert_eq!(trader.trend(), Trend::Range);

    // Same bar with a lower close puts price 1.6% under EMA-55
    assert_eq!(trader.on_kline(closed(58, 98.0)).await, KlineOutcome::Redelivered);
    assert_eq!(trader.trend(), Trend::Bearish);
    assert_eq!(trader.window().last().unwrap().close, 98.0);

    let changes: Vec<_> = entries_with(&status, LogCategory::Event)
        .into_iter()
        .filter(|m| m.contains("trend change"))
        .collect();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].contains("BEARISH"));
    assert!(exchange.market_calls().is_empty());
}

#[tokio::test]
async fn test_stale_orders_cancelled_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    store_in(&dir).save(&persisted_order(5)).unwrap();

    let exchange = Arc::new(MockExchange::new(declining_history(), 0.0));
    exchange.with(|s| {
        let mut resting = persisted_order(7);
        resting.status = OrderStatus::New;
        resting.executed_qty = 0.0;
        s.open_orders = vec![persisted_order(5), resting];
    });
    let (mut trader, _status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    let cancels: Vec<_> = exchange
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Cancel(_)))
        .collect();
    assert_eq!(cancels, vec![Call::Cancel(7)]);
    assert_eq!(trader.open_position().unwrap().order_id, 5);
}

#[tokio::test]
async fn test_unfinished_history_bar_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut history = declining_history();
    let mut forming = candle(58, 99.4);
    forming.open_time = Utc::now() - Duration::seconds(10);
    forming.close_time = forming.open_time + Duration::seconds(59);
    history.push(forming);

    let exchange = Arc::new(MockExchange::new(history, 1000.0));
    let (mut trader, _status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    assert_eq!(trader.window().len(), 58);
    assert_eq!(trader.window().last().unwrap().open_time, bar_open(57));
}

#[tokio::test]
async fn test_startup_fails_without_exchange() {
    let dir = tempfile::tempdir().unwrap();

    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    exchange.with(|s| s.fail_balance = true);
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    assert!(trader.start().await.is_err());
    assert!(entries_with(&status, LogCategory::Error)[0].contains("Balance query failed"));

    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    exchange.with(|s| s.fail_klines = true);
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    assert!(trader.start().await.is_err());
    assert!(entries_with(&status, LogCategory::Error)[0].contains("Candle history fetch failed"));
}

#[tokio::test]
async fn test_run_loop_ends_when_feed_closes() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    exchange.with(|s| s.fill_price = CROSS_UP.1);
    tx.send(closed(CROSS_UP.0, CROSS_UP.1)).await.unwrap();
    drop(tx);

    trader.run(rx, shutdown_rx).await;
    drop(shutdown_tx);

    assert_eq!(trader.state(), PositionState::Long);
    assert!(entries_with(&status, LogCategory::Event)
        .iter()
        .any(|m| m.contains("feed closed")));
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown_signal() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = Arc::new(MockExchange::new(declining_history(), 1000.0));
    let (mut trader, status) = trader_with(&exchange, &dir, 1.0);
    trader.start().await.unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    exchange.with(|s| s.fill_price = CROSS_UP.1);
    tx.send(closed(CROSS_UP.0, CROSS_UP.1)).await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(true);
    });

    // Feed sender is still alive, only the signal can end the loop
    tokio::time::timeout(std::time::Duration::from_secs(5), trader.run(rx, shutdown_rx))
        .await
        .expect("run did not stop on shutdown");

    assert_eq!(trader.state(), PositionState::Long);
    assert!(entries_with(&status, LogCategory::Event)
        .iter()
        .all(|m| !m.contains("feed closed")));
    drop(tx);
}
