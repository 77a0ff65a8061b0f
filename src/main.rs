use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};

use trendbot::api::BinanceClient;
use trendbot::config::Settings;
use trendbot::execution::{PriceFeedManager, Trader};
use trendbot::persistence::OrderStore;
use trendbot::reporting::StatusLog;
use trendbot::server;

const FEED_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "trendbot")]
#[command(about = "EMA crossover trading bot with trend filter", long_about = None)]
struct Cli {
    /// Optional config file (toml, yaml or json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Status page port, overrides PORT / BOT_HTTP_PORT
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("Invalid configuration")?;
    if let Some(port) = cli.port {
        settings.http_port = port;
    }

    tracing::info!("🚀 trendbot starting");
    tracing::debug!(?settings, "Loaded settings");

    let status = StatusLog::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Status page comes up first so startup failures are visible
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status page on {}", addr))?;
    let server_task = {
        let status = status.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let stop = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server::serve(listener, status, stop).await {
                tracing::error!(error = %e, "Status page stopped");
            }
        })
    };

    let exchange = BinanceClient::new(
        settings.api_key.clone(),
        settings.api_secret.clone(),
        settings.request_timeout(),
    )
    .context("Failed to build exchange client")?
    .with_base_url(settings.rest_base_url.clone())
    .with_recv_window(settings.recv_window_ms)
    .with_rate_limit(settings.rate_limit_per_minute);

    let trader_config = settings.trader_config();
    let mut trader = Trader::new(
        Arc::new(exchange),
        OrderStore::new(&settings.state_file),
        status.clone(),
        trader_config.clone(),
    );

    if let Err(e) = trader.start().await {
        let _ = shutdown_tx.send(true);
        let _ = server_task.await;
        return Err(anyhow::anyhow!("Startup failed: {}", e));
    }

    // Market data feed
    let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
    let feed = PriceFeedManager::new(
        settings.ws_base_url.clone(),
        &trader_config.symbol,
        &trader_config.interval,
    );
    let feed_task = tokio::spawn(feed.run(feed_tx));

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    trader.run(feed_rx, shutdown_rx).await;

    // Dropping the receiver inside run() stops the feed
    let _ = shutdown_tx.send(true);
    let _ = feed_task.await;
    let _ = server_task.await;

    tracing::info!("👋 trendbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trendbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
