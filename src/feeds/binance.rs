use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::BinanceConfig;
use crate::feeds::cache::MarketCache;
use crate::models::event::Event;
use crate::models::market::{BookTicker, LiquidationEvent, OrderSide, TradeEvent};

/// Real-time Binance USDT-M futures feed.
///
/// One combined stream multiplexes per-symbol aggregate trades and book
/// tickers plus the all-markets forced-order stream. Trades and books land
/// in the shared cache; liquidations for configured symbols are posted to
/// the engine mailbox.
pub struct MarketFeed {
    config: BinanceConfig,
    cache: Arc<MarketCache>,
    mailbox: mpsc::Sender<Event>,
}

/// Delay before reconnect attempt `attempt` (1-based): base * 2^(attempt-1).
pub fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    Duration::from_secs(base_secs.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(30)))
}

impl MarketFeed {
    pub fn new(config: BinanceConfig, cache: Arc<MarketCache>, mailbox: mpsc::Sender<Event>) -> Self {
        Self {
            config,
            cache,
            mailbox,
        }
    }

    fn stream_url(&self) -> String {
        let mut streams: Vec<String> = Vec::new();
        for sym in &self.config.symbols {
            let lower = sym.to_lowercase();
            streams.push(format!("{lower}@aggTrade"));
            streams.push(format!("{lower}@bookTicker"));
        }
        streams.push("!forceOrder@arr".to_string());
        format!("{}/stream?streams={}", self.config.ws_url, streams.join("/"))
    }

    /// Start the websocket reader. Spawns a background task that reconnects
    /// with exponential backoff up to the configured attempt ceiling, then
    /// posts `FeedUnavailable` and exits.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) {
        let ws_url = self.stream_url();
        let symbols = self.config.symbols.clone();
        let cache = self.cache.clone();
        let mailbox = self.mailbox.clone();
        let max_attempts = self.config.max_reconnect_attempts;
        let base_delay = self.config.reconnect_base_delay_secs;
        let ping_every = Duration::from_secs(self.config.ping_interval_secs);

        tokio::spawn(async move {
            // Consecutive failed attempts since the last healthy connection.
            let mut failures: u32 = 0;

            loop {
                if failures > 0 {
                    if failures >= max_attempts {
                        error!("Feed: reconnect ceiling ({max_attempts}) reached, giving up");
                        cache.set_connected(false);
                        let _ = mailbox.send(Event::FeedUnavailable).await;
                        return;
                    }
                    let delay = backoff_delay(base_delay, failures);
                    warn!(
                        "Feed: reconnecting in {:?} (attempt {}/{max_attempts})",
                        delay,
                        failures + 1
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => return,
                    }
                }

                info!("Feed: connecting to {ws_url}");
                let conn = tokio::select! {
                    result = connect_async(&ws_url) => result,
                    _ = shutdown.recv() => return,
                };

                let (ws_stream, _) = match conn {
                    Ok(ok) => ok,
                    Err(e) => {
                        error!("Feed: connection failed: {e}");
                        cache.set_connected(false);
                        failures += 1;
                        continue;
                    }
                };

                info!("Feed: connected");
                cache.set_connected(true);
                failures = 0; // reset ceiling on success

                let (mut write, mut read) = ws_stream.split();
                let mut ping = tokio::time::interval(ping_every);
                ping.tick().await; // immediate first tick

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    Self::handle_frame(&text, &symbols, &cache, &mailbox).await;
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    warn!("Feed: close frame: {frame:?}");
                                    break;
                                }
                                Some(Ok(_)) => {} // Binary, Pong, Frame
                                Some(Err(e)) => {
                                    warn!("Feed: stream error: {e}");
                                    break;
                                }
                                None => {
                                    warn!("Feed: stream ended");
                                    break;
                                }
                            }
                        }
                        _ = ping.tick() => {
                            if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                                warn!("Feed: ping failed: {e}");
                                break;
                            }
                        }
                        _ = shutdown.recv() => {
                            info!("Feed: shutdown");
                            return;
                        }
                    }
                }

                // Connection dropped after being healthy: back off from 1s.
                cache.set_connected(false);
                failures = 1;
            }
        });
    }

    /// Parse and route a combined-stream frame. Parse failures are logged
    /// and skipped; they never drop the connection.
    async fn handle_frame(
        text: &str,
        symbols: &[String],
        cache: &Arc<MarketCache>,
        mailbox: &mpsc::Sender<Event>,
    ) {
        let envelope: CombinedStreamMsg = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("Feed: unparseable frame: {e}");
                return;
            }
        };

        if envelope.stream.ends_with("@aggTrade") {
            match serde_json::from_value::<AggTradeMsg>(envelope.data) {
                Ok(msg) => {
                    if let Some(trade) = msg.to_event() {
                        cache.on_trade(&trade).await;
                    } else {
                        warn!("Feed: bad aggTrade fields");
                    }
                }
                Err(e) => warn!("Feed: bad aggTrade frame: {e}"),
            }
        } else if envelope.stream.ends_with("@bookTicker") {
            match serde_json::from_value::<BookTickerMsg>(envelope.data) {
                Ok(msg) => {
                    if let Some(book) = msg.to_event() {
                        cache.on_book(book).await;
                    } else {
                        warn!("Feed: bad bookTicker fields");
                    }
                }
                Err(e) => warn!("Feed: bad bookTicker frame: {e}"),
            }
        } else if envelope.stream.starts_with("!forceOrder") {
            match serde_json::from_value::<ForceOrderWrapper>(envelope.data) {
                Ok(wrapper) => {
                    let Some(liq) = wrapper.o.to_event() else {
                        warn!("Feed: bad forceOrder fields");
                        return;
                    };
                    // Only configured symbols become signals.
                    if !symbols.iter().any(|s| *s == liq.symbol) {
                        return;
                    }
                    debug!(
                        "Feed: liquidation {} {} ${:.0}",
                        liq.symbol,
                        liq.side.as_str(),
                        liq.notional()
                    );
                    if mailbox.send(Event::Liquidation(liq)).await.is_err() {
                        warn!("Feed: engine mailbox closed");
                    }
                }
                Err(e) => warn!("Feed: bad forceOrder frame: {e}"),
            }
        }
    }
}

// --- Venue frame types ---

#[derive(Debug, Deserialize)]
struct CombinedStreamMsg {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AggTradeMsg {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
    #[serde(rename = "T")]
    trade_time: i64,
}

impl AggTradeMsg {
    fn to_event(&self) -> Option<TradeEvent> {
        Some(TradeEvent {
            symbol: self.symbol.clone(),
            price: self.price.parse().ok()?,
            quantity: self.quantity.parse().ok()?,
            is_buyer_maker: self.is_buyer_maker,
            timestamp: Utc.timestamp_millis_opt(self.trade_time).single()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BookTickerMsg {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid_price: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask_price: String,
    #[serde(rename = "A")]
    ask_qty: String,
}

impl BookTickerMsg {
    fn to_event(&self) -> Option<BookTicker> {
        Some(BookTicker {
            symbol: self.symbol.clone(),
            bid_price: self.bid_price.parse().ok()?,
            bid_qty: self.bid_qty.parse().ok()?,
            ask_price: self.ask_price.parse().ok()?,
            ask_qty: self.ask_qty.parse().ok()?,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ForceOrderWrapper {
    o: ForceOrderData,
}

#[derive(Debug, Deserialize)]
struct ForceOrderData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

impl ForceOrderData {
    fn to_event(&self) -> Option<LiquidationEvent> {
        Some(LiquidationEvent {
            symbol: self.symbol.clone(),
            side: OrderSide::parse(&self.side)?,
            price: self.price.parse().ok()?,
            quantity: self.quantity.parse().ok()?,
            timestamp: Utc.timestamp_millis_opt(self.trade_time).single()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        // ~1, 2, 4, 8, 16, 32 seconds
        assert_eq!(backoff_delay(1, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(1, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(1, 6), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_force_order_routing() {
        let cache = Arc::new(MarketCache::new());
        let (tx, mut rx) = mpsc::channel(16);
        let symbols = vec!["BTCUSDT".to_string()];

        let frame = r#"{"stream":"!forceOrder@arr","data":{"o":{"s":"BTCUSDT","S":"SELL","p":"95000.0","q":"31.5","T":1700000000000}}}"#;
        MarketFeed::handle_frame(frame, &symbols, &cache, &tx).await;

        match rx.try_recv() {
            Ok(Event::Liquidation(liq)) => {
                assert_eq!(liq.symbol, "BTCUSDT");
                assert_eq!(liq.side, OrderSide::Sell);
                assert!((liq.notional() - 2_992_500.0).abs() < 1.0);
            }
            other => panic!("expected liquidation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_symbol_dropped() {
        let cache = Arc::new(MarketCache::new());
        let (tx, mut rx) = mpsc::channel(16);
        let symbols = vec!["BTCUSDT".to_string()];

        let frame = r#"{"stream":"!forceOrder@arr","data":{"o":{"s":"DOGEUSDT","S":"BUY","p":"0.1","q":"1000","T":1700000000000}}}"#;
        MarketFeed::handle_frame(frame, &symbols, &cache, &tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_parse_error_skipped() {
        let cache = Arc::new(MarketCache::new());
        let (tx, mut rx) = mpsc::channel(16);
        MarketFeed::handle_frame("not json", &[], &cache, &tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_agg_trade_updates_cache() {
        let cache = Arc::new(MarketCache::new());
        let (tx, _rx) = mpsc::channel(16);
        let symbols = vec!["BTCUSDT".to_string()];

        let frame = r#"{"stream":"btcusdt@aggTrade","data":{"s":"BTCUSDT","p":"95000.5","q":"0.25","m":false,"T":1700000000000}}"#;
        MarketFeed::handle_frame(frame, &symbols, &cache, &tx).await;

        let snap = cache.snapshot("BTCUSDT").await.unwrap();
        assert_eq!(snap.state.last_price, Some(95_000.5));
        assert_eq!(snap.state.volume_window.len(), 1);
    }
}
