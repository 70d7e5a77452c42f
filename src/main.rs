#![allow(dead_code)]

mod config;
mod control;
mod execution;
mod feeds;
mod models;
mod risk;
mod signals;
mod sink;
mod strategy;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::execution::live::LiveAdapter;
use crate::execution::paper::PaperAdapter;
use crate::execution::ExecutionAdapter;
use crate::feeds::binance::MarketFeed;
use crate::feeds::cache::MarketCache;
use crate::models::event::{Event, TradingMode};
use crate::risk::governor::RiskGovernor;
use crate::strategy::engine::StrategyEngine;
use crate::telemetry::alerts::AlertManager;
use crate::telemetry::latency::LatencyTracker;

/// Mailbox depth for the engine. Liquidations are rare; ticks dominate.
const MAILBOX_CAPACITY: usize = 1024;
/// How long boot waits for the first websocket connection.
const FEED_CONNECT_WAIT_SECS: u64 = 15;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("================================================");
    info!("  LIQFADE  liquidation reversion bot v0.1.0");
    info!("================================================");

    let config = Config::load_or_default();
    config.validate()?;

    info!("--- Mode: {} ---", config.mode.as_str());
    info!("--- Symbols: {:?} ---", config.binance.symbols);
    info!("--- Gate configuration ---");
    info!("  Volume mult:     {:.1}x", config.gate.volume_mult);
    info!("  Liq window:      {}s", config.gate.liq_window_seconds);
    info!("  Cooldown:        {}s", config.gate.symbol_cooldown_seconds);
    info!("--- Risk configuration ---");
    info!("  Leverage:        {}x", config.risk.leverage);
    info!("  Risk per trade:  {:.2}%", config.risk.risk_per_trade_pct * 100.0);
    info!("  Daily max loss:  {:.2}%", config.risk.daily_max_loss_pct * 100.0);
    info!("  Loss streak cap: {}", config.risk.max_consecutive_losses);
    info!("--- Exit configuration ---");
    info!("  TP/SL:           {:.2}% / {:.2}%", config.exits.tp_pct * 100.0, config.exits.sl_pct * 100.0);
    info!("  Time stop:       {}s", config.exits.time_stop_seconds);

    // === Shared infrastructure ===
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (mailbox_tx, mailbox_rx) = mpsc::channel::<Event>(MAILBOX_CAPACITY);
    let cache = Arc::new(MarketCache::new());

    // === Event sink ===
    let (sink, control_pool) = match &config.sink.database_url {
        Some(url) => {
            let (sink, pool) = sink::spawn_postgres(url, config.sink.queue_capacity).await?;
            info!("Sink: Postgres writer ready");
            (sink, Some(pool))
        }
        None => {
            warn!("Sink: no DATABASE_URL, records stay in memory");
            let (sink, _store) = sink::spawn_memory(config.sink.queue_capacity);
            (sink, None)
        }
    };

    // === Execution adapters ===
    let starting_capital = Config::starting_capital();
    let paper: Arc<dyn ExecutionAdapter> =
        Arc::new(PaperAdapter::new(cache.clone(), starting_capital));
    let live: Option<Arc<dyn ExecutionAdapter>> = if !config.binance.api_key.is_empty() {
        let adapter = LiveAdapter::new(&config.binance, config.is_paper());
        if config.mode == TradingMode::Live {
            adapter
                .ping()
                .await
                .map_err(|e| anyhow::anyhow!("venue unreachable: {e}"))?;
            info!("Adapter: venue reachable");
        }
        Some(Arc::new(adapter))
    } else {
        None
    };

    // === Risk governor (baseline from the active adapter) ===
    let equity = match config.mode {
        TradingMode::Live => {
            let adapter = live
                .as_ref()
                .expect("validate() guarantees live credentials");
            match adapter.get_equity().await {
                Ok(e) => e,
                Err(e) => {
                    error!("Adapter unreachable at boot: {e}");
                    return Err(anyhow::anyhow!("cannot fetch equity: {e}"));
                }
            }
        }
        TradingMode::Paper => starting_capital,
    };
    info!("Equity baseline: {equity:.2} USDT");
    let governor = RiskGovernor::new(config.risk.clone(), equity, Utc::now());

    // === Telemetry ===
    let alerts = Arc::new(AlertManager::new(config.telemetry.clone()));
    let latency = Arc::new(LatencyTracker::new(1000));

    // === Market feed ===
    let feed = MarketFeed::new(config.binance.clone(), cache.clone(), mailbox_tx.clone());
    feed.start(shutdown_tx.subscribe());

    // Give the feed a moment to come up before declaring RUNNING.
    let connect_deadline = tokio::time::Instant::now() + Duration::from_secs(FEED_CONNECT_WAIT_SECS);
    while !cache.is_connected() && tokio::time::Instant::now() < connect_deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    if !cache.is_connected() {
        warn!("Feed not connected yet, continuing boot anyway");
    }

    // === Strategy engine ===
    let mut engine = StrategyEngine::new(
        config.clone(),
        cache.clone(),
        paper,
        live,
        governor,
        sink.clone(),
        alerts,
        latency,
    );
    engine.boot().await;

    // === Tick producers + control poller ===
    control::spawn_tick_producers(mailbox_tx.clone(), &shutdown_tx);
    if let Some(pool) = control_pool {
        control::spawn_control_poller(pool, mailbox_tx.clone(), &shutdown_tx);
    }

    let engine_task = tokio::spawn(engine.run(mailbox_rx));

    info!("=== liqfade running, Ctrl+C to stop ===");
    tokio::signal::ctrl_c().await?;
    info!("Termination signal received");

    // Flatten-then-shutdown is handled inside the engine.
    let _ = mailbox_tx.send(Event::Shutdown).await;
    let _ = shutdown_tx.send(());
    let _ = engine_task.await;

    info!("liqfade shutdown complete");
    Ok(())
}
