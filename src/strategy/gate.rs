//! The multi-factor entry gate.
//!
//! Every liquidation for a configured symbol is scored against five signal
//! factors; the full breakdown is persisted whether or not the setup passes.

use crate::config::GateConfig;
use crate::feeds::cache::SymbolSnapshot;
use crate::models::market::LiquidationEvent;
use crate::signals::rolling;

/// Momentum is measured over a fixed trailing minute.
const MOMENTUM_WINDOW_SECS: u64 = 60;
/// The volume surge is measured over the same fixed minute.
const VOLUME_WINDOW_SECS: u64 = 60;
/// Runaway moves are not faded: reject when |60s delta| reaches this percent.
const MAX_MOMENTUM_PCT: f64 = 0.5;

/// Raw factor values and verdicts for one liquidation.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub liq_size_ok: bool,
    pub volume_ok: bool,
    pub spread_ok: bool,
    pub momentum_ok: bool,
    pub exhaustion_ok: bool,
    pub volume_mult_value: f64,
    pub spread_bps_value: f64,
    pub price_delta_value: f64,
    pub exhaustion_value: u32,
    pub reasons: Vec<String>,
}

impl GateOutcome {
    /// Conjunction of the five signal factors (risk admission is separate).
    pub fn signal_quality_passed(&self) -> bool {
        self.liq_size_ok
            && self.volume_ok
            && self.spread_ok
            && self.momentum_ok
            && self.exhaustion_ok
    }
}

/// `window_notional` is the symbol's forced-order notional accumulated over
/// the trailing `liq_window_seconds`, including the event under evaluation;
/// a lone liquidation contributes exactly its own notional.
pub fn evaluate(
    config: &GateConfig,
    liq: &LiquidationEvent,
    snap: &SymbolSnapshot,
    window_notional: f64,
) -> GateOutcome {
    let mut reasons = Vec::new();

    let min_liq = config
        .min_liq_usd
        .get(&liq.symbol)
        .copied()
        .unwrap_or(f64::MAX);
    let liq_size_ok = window_notional >= min_liq;
    if !liq_size_ok {
        reasons.push(format!(
            "Liq ${:.0} < min ${:.0}",
            window_notional, min_liq
        ));
    }

    // A baseline shorter than the configured lookback is no baseline at all.
    let avg = rolling::avg_volume(snap);
    let recent = rolling::recent_volume(snap, VOLUME_WINDOW_SECS);
    let volume_mult_value =
        if avg > 0.0 && snap.state.volume_window.len() >= config.volume_lookback {
            recent / avg
        } else {
            0.0
        };
    let volume_ok = volume_mult_value >= config.volume_mult;
    if !volume_ok {
        reasons.push(format!(
            "Volume {:.2}x < {:.1}x",
            volume_mult_value, config.volume_mult
        ));
    }

    let max_spread = config
        .max_spread_bps
        .get(&liq.symbol)
        .copied()
        .unwrap_or(0.0);
    let spread_bps_value = rolling::spread_bps(snap);
    let spread_ok = spread_bps_value <= max_spread;
    if !spread_ok {
        reasons.push(format!(
            "Spread {:.1}bps > {}bps",
            spread_bps_value, max_spread
        ));
    }

    let price_delta_value = rolling::price_delta(snap, MOMENTUM_WINDOW_SECS);
    let momentum_ok = price_delta_value.abs() < MAX_MOMENTUM_PCT;
    if !momentum_ok {
        reasons.push(format!(
            "Momentum {:.2}% exceeds {:.1}%",
            price_delta_value, MAX_MOMENTUM_PCT
        ));
    }

    let exhaustion_value = rolling::exhaustion_candles(snap);
    let exhaustion_ok = exhaustion_value >= config.exhaustion_candles;
    if !exhaustion_ok {
        reasons.push(format!(
            "Exhaustion {} < {}",
            exhaustion_value, config.exhaustion_candles
        ));
    }

    GateOutcome {
        liq_size_ok,
        volume_ok,
        spread_ok,
        momentum_ok,
        exhaustion_ok,
        volume_mult_value,
        spread_bps_value,
        price_delta_value,
        exhaustion_value,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::cache::SymbolState;
    use crate::models::market::{BookTicker, OrderSide};
    use chrono::{Duration, Utc};
    use std::collections::VecDeque;

    fn liq(notional: f64) -> LiquidationEvent {
        LiquidationEvent {
            symbol: "BTCUSDT".into(),
            side: OrderSide::Sell,
            price: 95_000.0,
            quantity: notional / 95_000.0,
            timestamp: Utc::now(),
        }
    }

    /// A snapshot that passes every factor: surging volume, tight book,
    /// flat momentum, choppy recent prices.
    fn passing_snapshot() -> SymbolSnapshot {
        let now = Utc::now();
        let mut state = SymbolState::default();

        state.book = Some(BookTicker {
            symbol: "BTCUSDT".into(),
            bid_price: 94_990.5,
            bid_qty: 2.0,
            ask_price: 95_009.5,
            ask_qty: 2.0,
            timestamp: now,
        });
        state.last_price = Some(95_000.0);

        // Oscillating prices around 95k: momentum ~0, reversals present.
        state.price_history = [
            (95_000.0, 60),
            (95_040.0, 40),
            (94_980.0, 20),
            (95_000.0, 0),
        ]
        .iter()
        .map(|(p, ago)| (*p, now - Duration::seconds(*ago)))
        .collect::<VecDeque<_>>();

        // Old volume small, recent volume large: avg 3200, 60s recent slice
        // (600 samples) all 5000 → multiple ≈ 1.56.
        let mut volume = VecDeque::new();
        for _ in 0..400 {
            volume.push_back(500.0);
        }
        for _ in 0..600 {
            volume.push_back(5_000.0);
        }
        state.volume_window = volume;

        SymbolSnapshot {
            symbol: "BTCUSDT".into(),
            state,
            taken_at: now,
        }
    }

    #[test]
    fn test_all_factors_pass() {
        let config = GateConfig::default();
        let event = liq(3_000_000.0);
        let outcome = evaluate(&config, &event, &passing_snapshot(), event.notional());
        assert!(outcome.liq_size_ok, "reasons: {:?}", outcome.reasons);
        assert!(outcome.volume_ok, "reasons: {:?}", outcome.reasons);
        assert!(outcome.spread_ok, "reasons: {:?}", outcome.reasons);
        assert!(outcome.momentum_ok, "reasons: {:?}", outcome.reasons);
        assert!(outcome.exhaustion_ok, "reasons: {:?}", outcome.reasons);
        assert!(outcome.signal_quality_passed());
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn test_small_liquidation_rejected() {
        let config = GateConfig::default();
        let event = liq(10_000.0);
        let outcome = evaluate(&config, &event, &passing_snapshot(), event.notional());
        assert!(!outcome.liq_size_ok);
        assert!(!outcome.signal_quality_passed());
        assert!(outcome.reasons[0].starts_with("Liq $"));
    }

    #[test]
    fn test_cascade_notional_counts() {
        // A small forced order rides on the notional already accumulated in
        // the trailing window.
        let config = GateConfig::default();
        let event = liq(10_000.0);
        let outcome = evaluate(&config, &event, &passing_snapshot(), 600_000.0);
        assert!(outcome.liq_size_ok);
    }

    #[test]
    fn test_wide_spread_rejected_with_reason() {
        let config = GateConfig::default();
        let mut snap = passing_snapshot();
        // ~6 bps on a 95k mid
        let book = snap.state.book.as_mut().unwrap();
        book.bid_price = 94_971.5;
        book.ask_price = 95_028.5;

        let event = liq(3_000_000.0);
        let outcome = evaluate(&config, &event, &snap, event.notional());
        assert!(!outcome.spread_ok);
        assert!(!outcome.signal_quality_passed());
        let reason = outcome.reasons.join("; ");
        assert!(reason.contains("Spread 6.0bps > 3bps"), "got: {reason}");
    }

    #[test]
    fn test_runaway_momentum_rejected() {
        let config = GateConfig::default();
        let mut snap = passing_snapshot();
        // 1% rally over the last minute.
        snap.state.price_history = [
            (94_000.0, 60),
            (94_300.0, 40),
            (94_600.0, 20),
            (94_940.0, 0),
        ]
        .iter()
        .map(|(p, ago)| (*p, snap.taken_at - Duration::seconds(*ago)))
        .collect::<VecDeque<_>>();

        let event = liq(3_000_000.0);
        let outcome = evaluate(&config, &event, &snap, event.notional());
        assert!(!outcome.momentum_ok);
        // And a steady trend has no reversals either.
        assert!(!outcome.exhaustion_ok);
    }

    #[test]
    fn test_no_volume_baseline_fails_volume_factor() {
        let config = GateConfig::default();
        let mut snap = passing_snapshot();
        snap.state.volume_window.clear();

        let event = liq(3_000_000.0);
        let outcome = evaluate(&config, &event, &snap, event.notional());
        assert_eq!(outcome.volume_mult_value, 0.0);
        assert!(!outcome.volume_ok);
    }

    #[test]
    fn test_short_baseline_fails_volume_factor() {
        // Fewer samples than volume_lookback: no baseline to trust.
        let config = GateConfig::default();
        let mut snap = passing_snapshot();
        snap.state.volume_window = (0..10).map(|_| 5_000.0).collect();

        let event = liq(3_000_000.0);
        let outcome = evaluate(&config, &event, &snap, event.notional());
        assert_eq!(outcome.volume_mult_value, 0.0);
        assert!(!outcome.volume_ok);
    }
}
