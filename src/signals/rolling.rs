//! Rolling statistics over market-cache snapshots.
//!
//! Every function here is pure and deterministic given a `SymbolSnapshot`,
//! so a single gate evaluation sees one consistent view of the market.

use chrono::{DateTime, Duration, Utc};

use crate::feeds::cache::{SymbolSnapshot, BOOK_STALE_SECS};

/// Returned when no book has ever been seen for the symbol.
pub const SPREAD_SENTINEL_BPS: f64 = 999.0;

/// Trade samples expected per second when sizing the recent-volume window.
const SAMPLES_PER_SEC: usize = 10;

/// Tolerance when matching an exhaustion sample to its target time.
const SAMPLE_TOLERANCE_SECS: i64 = 10;

/// Mid price from the latest book ticker. Undefined without a book.
pub fn mid(snap: &SymbolSnapshot) -> Option<f64> {
    snap.state.book.as_ref().map(|b| b.mid())
}

/// Best price for valuing a position: mid when the book is present,
/// last trade otherwise.
pub fn current_price(snap: &SymbolSnapshot) -> Option<f64> {
    mid(snap).or(snap.state.last_price)
}

/// Spread in basis points. Missing book returns the large sentinel;
/// a stale book (no update for > 2 s) returns +inf so checks fail safe.
pub fn spread_bps(snap: &SymbolSnapshot) -> f64 {
    match &snap.state.book {
        None => SPREAD_SENTINEL_BPS,
        Some(book) => {
            let age = snap.taken_at - book.timestamp;
            if age > Duration::seconds(BOOK_STALE_SECS) {
                return f64::INFINITY;
            }
            book.spread_bps()
        }
    }
}

/// Mean per-trade notional over the entire volume window.
pub fn avg_volume(snap: &SymbolSnapshot) -> f64 {
    let window = &snap.state.volume_window;
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

/// Mean per-trade notional over the last `min(len, seconds * 10)` samples.
pub fn recent_volume(snap: &SymbolSnapshot, seconds: u64) -> f64 {
    let window = &snap.state.volume_window;
    if window.is_empty() {
        return 0.0;
    }
    let take = window.len().min(seconds as usize * SAMPLES_PER_SEC);
    let sum: f64 = window.iter().rev().take(take).sum();
    sum / take as f64
}

/// Percent price change over the trailing `seconds` window.
///
/// Uses the earliest history entry inside the window; when the window has
/// no entry, falls back to the earliest available one.
pub fn price_delta(snap: &SymbolSnapshot, seconds: u64) -> f64 {
    let history = &snap.state.price_history;
    let current = match current_price(snap) {
        Some(p) => p,
        None => return 0.0,
    };

    let cutoff = snap.taken_at - Duration::seconds(seconds as i64);
    let oldest = history
        .iter()
        .find(|(_, ts)| *ts >= cutoff)
        .or_else(|| history.front());

    match oldest {
        Some((price, _)) if *price > 0.0 => (current - price) / price * 100.0,
        _ => 0.0,
    }
}

/// Count of direction reversals across four samples taken at now, −20 s,
/// −40 s and −60 s (nearest history entry within 10 s of each target).
/// Returns 0 when fewer than 3 samples resolve.
pub fn exhaustion_candles(snap: &SymbolSnapshot) -> u32 {
    let mut samples: Vec<f64> = Vec::with_capacity(4);
    // Oldest target first so reversals read chronologically.
    for offset in [60i64, 40, 20, 0] {
        let target = snap.taken_at - Duration::seconds(offset);
        if let Some(price) = nearest_sample(snap, target) {
            samples.push(price);
        }
    }

    if samples.len() < 3 {
        return 0;
    }

    let mut reversals = 0;
    for i in 2..samples.len() {
        let prev = samples[i - 1] - samples[i - 2];
        let curr = samples[i] - samples[i - 1];
        if prev != 0.0 && curr != 0.0 && prev.signum() != curr.signum() {
            reversals += 1;
        }
    }
    reversals
}

fn nearest_sample(snap: &SymbolSnapshot, target: DateTime<Utc>) -> Option<f64> {
    let tolerance = Duration::seconds(SAMPLE_TOLERANCE_SECS);
    snap.state
        .price_history
        .iter()
        .filter(|(_, ts)| (*ts - target).abs() <= tolerance)
        .min_by_key(|(_, ts)| (*ts - target).abs())
        .map(|(price, _)| *price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::cache::SymbolState;
    use crate::models::market::BookTicker;
    use std::collections::VecDeque;

    fn snapshot(state: SymbolState) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: "BTCUSDT".into(),
            state,
            taken_at: Utc::now(),
        }
    }

    fn with_history(prices: &[(f64, i64)]) -> SymbolSnapshot {
        let now = Utc::now();
        let mut state = SymbolState::default();
        state.price_history = prices
            .iter()
            .map(|(p, secs_ago)| (*p, now - Duration::seconds(*secs_ago)))
            .collect::<VecDeque<_>>();
        state.last_price = prices.last().map(|(p, _)| *p);
        SymbolSnapshot {
            symbol: "BTCUSDT".into(),
            state,
            taken_at: now,
        }
    }

    #[test]
    fn test_spread_sentinel_without_book() {
        let snap = snapshot(SymbolState::default());
        assert_eq!(spread_bps(&snap), SPREAD_SENTINEL_BPS);
    }

    #[test]
    fn test_spread_stale_book_is_infinite() {
        let mut state = SymbolState::default();
        state.book = Some(BookTicker {
            symbol: "BTCUSDT".into(),
            bid_price: 94_990.0,
            bid_qty: 1.0,
            ask_price: 95_010.0,
            ask_qty: 1.0,
            timestamp: Utc::now() - Duration::seconds(5),
        });
        let snap = snapshot(state);
        assert!(spread_bps(&snap).is_infinite());
    }

    #[test]
    fn test_avg_and_recent_volume() {
        let mut state = SymbolState::default();
        state.volume_window = (1..=100).map(|i| i as f64).collect();
        let snap = snapshot(state);

        assert!((avg_volume(&snap) - 50.5).abs() < 1e-9);
        // 2s window → last 20 samples: 81..=100, mean 90.5
        assert!((recent_volume(&snap, 2) - 90.5).abs() < 1e-9);
        // Window longer than data → whole window mean
        assert!((recent_volume(&snap, 60) - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_price_delta_in_window() {
        // 95k 50s ago → 95.95k now = +1%
        let snap = with_history(&[(95_000.0, 50), (95_950.0, 0)]);
        assert!((price_delta(&snap, 60) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_price_delta_falls_back_to_earliest() {
        // Only entries older than the window: use the earliest available.
        let snap = with_history(&[(95_000.0, 200), (95_095.0, 150)]);
        assert!((price_delta(&snap, 60) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_exhaustion_reversals() {
        // up, down, up across the four samples → 2 reversals
        let snap = with_history(&[(100.0, 60), (110.0, 40), (105.0, 20), (112.0, 0)]);
        assert_eq!(exhaustion_candles(&snap), 2);

        // steady rise → 0 reversals
        let snap = with_history(&[(100.0, 60), (101.0, 40), (102.0, 20), (103.0, 0)]);
        assert_eq!(exhaustion_candles(&snap), 0);
    }

    #[test]
    fn test_exhaustion_needs_three_samples() {
        let snap = with_history(&[(100.0, 20), (101.0, 0)]);
        assert_eq!(exhaustion_candles(&snap), 0);
    }
}
