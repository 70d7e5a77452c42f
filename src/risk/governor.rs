use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::RiskConfig;

/// Outcome of a pre-trade admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admit,
    /// This setup is rejected but trading continues.
    RejectSignal(Vec<String>),
    /// This setup is rejected and the bot must enter the risk pause.
    RejectAndPause(Vec<String>),
}

/// Per-UTC-day risk ledger.
#[derive(Debug, Clone)]
pub struct RiskDay {
    pub day_start: DateTime<Utc>,
    pub equity_baseline: Decimal,
    pub pnl_today: Decimal,
    pub trade_count_today: u32,
    pub consecutive_losses: u32,
    pub realized_wins: u32,
    pub realized_losses: u32,
}

impl RiskDay {
    fn new(now: DateTime<Utc>, equity: Decimal) -> Self {
        Self {
            day_start: day_start_of(now),
            equity_baseline: equity,
            pnl_today: Decimal::ZERO,
            trade_count_today: 0,
            consecutive_losses: 0,
            realized_wins: 0,
            realized_losses: 0,
        }
    }

    /// Fraction of the baseline lost so far today (0 when flat or up).
    pub fn loss_fraction(&self) -> Decimal {
        if self.equity_baseline <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let drawdown = self.pnl_today.min(Decimal::ZERO).abs();
        drawdown / self.equity_baseline
    }
}

fn day_start_of(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc()
}

/// Holds the daily counters and decides whether a candidate trade is
/// admissible, and whether the bot must enter the risk pause.
///
/// Owned exclusively by the strategy engine task; no internal locking.
pub struct RiskGovernor {
    config: RiskConfig,
    day: RiskDay,
    pause_until: Option<DateTime<Utc>>,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig, equity: f64, now: DateTime<Utc>) -> Self {
        let baseline = Decimal::from_f64_retain(equity).unwrap_or(Decimal::ZERO);
        Self {
            config,
            day: RiskDay::new(now, baseline),
            pause_until: None,
        }
    }

    pub fn day(&self) -> &RiskDay {
        &self.day
    }

    pub fn equity_baseline(&self) -> f64 {
        self.day
            .equity_baseline
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0)
    }

    /// Admission is the conjunction of trade-count, loss-streak and
    /// daily-loss limits. Streak and daily-loss breaches escalate to a
    /// pause; the trade-count cap only rejects the signal.
    pub fn admit(&self) -> Decision {
        let mut reject = Vec::new();
        let mut pause = Vec::new();

        if self.day.trade_count_today >= self.config.max_trades_per_day {
            reject.push(format!(
                "Daily trade cap reached ({}/{})",
                self.day.trade_count_today, self.config.max_trades_per_day
            ));
        }

        if self.day.consecutive_losses >= self.config.max_consecutive_losses {
            pause.push(format!(
                "{} consecutive losses >= limit {}",
                self.day.consecutive_losses, self.config.max_consecutive_losses
            ));
        }

        let max_loss = Decimal::from_f64_retain(self.config.daily_max_loss_pct)
            .unwrap_or(Decimal::ONE);
        if self.day.loss_fraction() >= max_loss {
            pause.push(format!(
                "Daily loss {:.2}% >= limit {:.2}%",
                self.day.loss_fraction() * Decimal::from(100),
                self.config.daily_max_loss_pct * 100.0
            ));
        }

        if !pause.is_empty() {
            pause.extend(reject);
            Decision::RejectAndPause(pause)
        } else if !reject.is_empty() {
            Decision::RejectSignal(reject)
        } else {
            Decision::Admit
        }
    }

    /// Record an entry against today's trade count.
    pub fn on_trade_opened(&mut self) {
        self.day.trade_count_today += 1;
    }

    /// Update the ledger with a realized PnL. Losses extend the streak,
    /// non-negative closes reset it.
    pub fn on_trade_closed(&mut self, pnl: f64) {
        let pnl_dec = Decimal::from_f64_retain(pnl).unwrap_or(Decimal::ZERO);
        self.day.pnl_today += pnl_dec;

        if pnl < 0.0 {
            self.day.consecutive_losses += 1;
            self.day.realized_losses += 1;
        } else {
            self.day.consecutive_losses = 0;
            self.day.realized_wins += 1;
        }

        info!(
            "Risk: closed pnl={:.4} pnl_today={} streak={}",
            pnl, self.day.pnl_today, self.day.consecutive_losses
        );
    }

    /// Whether `now` is past the ledger's UTC day. Callers use this to
    /// fetch a fresh equity baseline before invoking `maybe_rollover`.
    pub fn needs_rollover(&self, now: DateTime<Utc>) -> bool {
        day_start_of(now) > self.day.day_start
    }

    /// Reset the ledger when `now` has crossed the UTC day boundary.
    /// Returns true when a rollover happened; this also ends any pause.
    pub fn maybe_rollover(&mut self, now: DateTime<Utc>, equity: f64) -> bool {
        if day_start_of(now) <= self.day.day_start {
            return false;
        }
        info!(
            "Risk: day rollover, closing ledger pnl={} trades={} wins={} losses={}",
            self.day.pnl_today,
            self.day.trade_count_today,
            self.day.realized_wins,
            self.day.realized_losses
        );
        let baseline = Decimal::from_f64_retain(equity).unwrap_or(self.day.equity_baseline);
        self.day = RiskDay::new(now, baseline);
        self.pause_until = None;
        true
    }

    /// Arm the timed risk pause.
    pub fn start_pause(&mut self, now: DateTime<Utc>) {
        let until =
            now + Duration::minutes(self.config.pause_after_consecutive_losses_minutes as i64);
        warn!("Risk: pausing until {until}");
        self.pause_until = Some(until);
    }

    /// Whether the timed pause has expired. Manual resume never consults
    /// this; only the engine's cooldown/rollover path does.
    pub fn pause_expired(&self, now: DateTime<Utc>) -> bool {
        match self.pause_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    pub fn clear_pause(&mut self) {
        self.pause_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> RiskGovernor {
        let config = RiskConfig {
            max_trades_per_day: 3,
            max_consecutive_losses: 3,
            daily_max_loss_pct: 0.02,
            ..RiskConfig::default()
        };
        RiskGovernor::new(config, 1400.0, Utc::now())
    }

    #[test]
    fn test_admit_when_clean() {
        let gov = governor();
        assert_eq!(gov.admit(), Decision::Admit);
    }

    #[test]
    fn test_trade_cap_rejects_signal_only() {
        let mut gov = governor();
        for _ in 0..3 {
            gov.on_trade_opened();
        }
        match gov.admit() {
            Decision::RejectSignal(reasons) => {
                assert!(reasons[0].contains("trade cap"));
            }
            other => panic!("expected RejectSignal, got {other:?}"),
        }
    }

    #[test]
    fn test_loss_streak_pauses() {
        let mut gov = governor();
        gov.on_trade_closed(-5.0);
        gov.on_trade_closed(-5.0);
        assert_eq!(gov.day().consecutive_losses, 2);
        assert_eq!(gov.admit(), Decision::Admit);

        gov.on_trade_closed(-5.0);
        assert!(matches!(gov.admit(), Decision::RejectAndPause(_)));
    }

    #[test]
    fn test_streak_resets_on_win() {
        let mut gov = governor();
        gov.on_trade_closed(-5.0);
        gov.on_trade_closed(-5.0);
        gov.on_trade_closed(0.0); // break-even counts as non-negative
        assert_eq!(gov.day().consecutive_losses, 0);
        assert_eq!(gov.day().realized_wins, 1);
        assert_eq!(gov.day().realized_losses, 2);
    }

    #[test]
    fn test_daily_loss_pauses() {
        let mut gov = governor();
        // 2% of 1400 = 28
        gov.on_trade_closed(-30.0);
        match gov.admit() {
            Decision::RejectAndPause(reasons) => {
                assert!(reasons[0].contains("Daily loss"));
            }
            other => panic!("expected RejectAndPause, got {other:?}"),
        }
    }

    #[test]
    fn test_rollover_resets_ledger() {
        let mut gov = governor();
        gov.on_trade_closed(-30.0);
        gov.on_trade_opened();
        gov.start_pause(Utc::now());

        let tomorrow = Utc::now() + Duration::days(1);
        assert!(gov.maybe_rollover(tomorrow, 1370.0));
        assert_eq!(gov.day().trade_count_today, 0);
        assert_eq!(gov.day().pnl_today, Decimal::ZERO);
        assert!(gov.pause_expired(tomorrow));
        assert_eq!(gov.admit(), Decision::Admit);

        // Same day again: no rollover.
        assert!(!gov.maybe_rollover(tomorrow, 1370.0));
    }

    #[test]
    fn test_pause_expiry() {
        let mut gov = governor();
        let now = Utc::now();
        gov.start_pause(now);
        assert!(!gov.pause_expired(now + Duration::minutes(1)));
        assert!(gov.pause_expired(now + Duration::minutes(61)));
    }
}
