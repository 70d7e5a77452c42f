use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::models::market::{BookTicker, TradeEvent};

/// Price history horizon. Entries older than this are evicted on append.
pub const PRICE_HISTORY_SECS: i64 = 300;
/// Per-trade notional samples kept per symbol.
pub const VOLUME_WINDOW_SAMPLES: usize = 1000;
/// Book older than this is treated as stale by spread checks.
pub const BOOK_STALE_SECS: i64 = 2;

/// Rolling per-symbol market state. Written only by the feed task.
#[derive(Debug, Default, Clone)]
pub struct SymbolState {
    pub last_price: Option<f64>,
    pub book: Option<BookTicker>,
    /// (price, timestamp) appended on every aggregate trade, last 5 minutes.
    pub price_history: VecDeque<(f64, DateTime<Utc>)>,
    /// Per-trade notional, last 1000 samples.
    pub volume_window: VecDeque<f64>,
}

/// A consistent copy of one symbol's state, taken under the read lock.
/// All rolling statistics are computed from snapshots so the numbers in a
/// single gate evaluation agree with each other.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub state: SymbolState,
    pub taken_at: DateTime<Utc>,
}

/// Shared market cache: one writer (the feed), many readers.
pub struct MarketCache {
    symbols: RwLock<HashMap<String, SymbolState>>,
    connected: AtomicBool,
}

impl MarketCache {
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Append a trade to the price history and volume window.
    pub async fn on_trade(&self, trade: &TradeEvent) {
        let mut map = self.symbols.write().await;
        let state = map.entry(trade.symbol.clone()).or_default();

        state.last_price = Some(trade.price);

        state.price_history.push_back((trade.price, trade.timestamp));
        let horizon = trade.timestamp - Duration::seconds(PRICE_HISTORY_SECS);
        while let Some((_, ts)) = state.price_history.front() {
            if *ts < horizon {
                state.price_history.pop_front();
            } else {
                break;
            }
        }

        if state.volume_window.len() >= VOLUME_WINDOW_SAMPLES {
            state.volume_window.pop_front();
        }
        state.volume_window.push_back(trade.notional());
    }

    /// Replace the top-of-book entry.
    pub async fn on_book(&self, book: BookTicker) {
        let mut map = self.symbols.write().await;
        let state = map.entry(book.symbol.clone()).or_default();
        state.book = Some(book);
    }

    pub async fn snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        let map = self.symbols.read().await;
        map.get(symbol).map(|state| SymbolSnapshot {
            symbol: symbol.to_string(),
            state: state.clone(),
            taken_at: Utc::now(),
        })
    }

    /// Latest mid price, falling back to last trade when the book is absent.
    pub async fn reference_price(&self, symbol: &str) -> Option<f64> {
        let map = self.symbols.read().await;
        let state = map.get(symbol)?;
        state.book.as_ref().map(|b| b.mid()).or(state.last_price)
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, price: f64, qty: f64, ts: DateTime<Utc>) -> TradeEvent {
        TradeEvent {
            symbol: symbol.into(),
            price,
            quantity: qty,
            is_buyer_maker: false,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_price_history_eviction() {
        let cache = MarketCache::new();
        let now = Utc::now();

        cache
            .on_trade(&trade("BTCUSDT", 95_000.0, 0.1, now - Duration::seconds(400)))
            .await;
        cache
            .on_trade(&trade("BTCUSDT", 95_100.0, 0.1, now))
            .await;

        let snap = cache.snapshot("BTCUSDT").await.unwrap();
        // The 400s-old entry must be gone.
        assert_eq!(snap.state.price_history.len(), 1);
        assert_eq!(snap.state.price_history[0].0, 95_100.0);
    }

    #[tokio::test]
    async fn test_volume_window_bounded() {
        let cache = MarketCache::new();
        let now = Utc::now();
        for i in 0..(VOLUME_WINDOW_SAMPLES + 10) {
            cache
                .on_trade(&trade("BTCUSDT", 95_000.0, i as f64, now))
                .await;
        }
        let snap = cache.snapshot("BTCUSDT").await.unwrap();
        assert_eq!(snap.state.volume_window.len(), VOLUME_WINDOW_SAMPLES);
    }

    #[tokio::test]
    async fn test_reference_price_prefers_mid() {
        let cache = MarketCache::new();
        let now = Utc::now();
        cache.on_trade(&trade("BTCUSDT", 94_000.0, 0.1, now)).await;
        cache
            .on_book(BookTicker {
                symbol: "BTCUSDT".into(),
                bid_price: 94_990.0,
                bid_qty: 1.0,
                ask_price: 95_010.0,
                ask_qty: 1.0,
                timestamp: now,
            })
            .await;
        assert_eq!(cache.reference_price("BTCUSDT").await, Some(95_000.0));
    }
}
