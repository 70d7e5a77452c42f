use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::market::PositionSide;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TimeStop,
    Manual,
    Flatten,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TP",
            ExitReason::StopLoss => "SL",
            ExitReason::TimeStop => "TIME_STOP",
            ExitReason::Manual => "MANUAL",
            ExitReason::Flatten => "FLATTEN",
        }
    }
}

/// The single open position. At most one exists across all symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub trade_id: i64,
    pub setup_id: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
}

impl OpenPosition {
    /// Signed return at `current_price`, as a fraction (0.0035 = 0.35%).
    pub fn pnl_pct(&self, current_price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        let raw = (current_price - self.entry_price) / self.entry_price;
        match self.side {
            PositionSide::Long => raw,
            PositionSide::Short => -raw,
        }
    }

    pub fn notional(&self) -> f64 {
        self.entry_price * self.quantity
    }

    pub fn held_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entry_time).num_seconds()
    }
}

/// One trade lifecycle, persisted open and updated on close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub setup_id: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub pnl_usdt: f64,
    pub pnl_pct: f64,
    pub duration_s: i64,
    pub fees: f64,
    pub slippage_est_pct: f64,
    pub exit_reason: Option<ExitReason>,
    pub entry_ts: DateTime<Utc>,
    pub exit_ts: Option<DateTime<Utc>>,
}

impl TradeRecord {
    pub fn open(position: &OpenPosition, slippage_est_pct: f64) -> Self {
        Self {
            id: position.trade_id,
            setup_id: position.setup_id,
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price: None,
            quantity: position.quantity,
            pnl_usdt: 0.0,
            pnl_pct: 0.0,
            duration_s: 0,
            fees: 0.0,
            slippage_est_pct,
            exit_reason: None,
            entry_ts: position.entry_time,
            exit_ts: None,
        }
    }

    /// Fill in the closing leg. `pnl_usdt` is gross of fees.
    pub fn close(
        &mut self,
        exit_price: f64,
        pnl_usdt: f64,
        pnl_pct: f64,
        fees: f64,
        reason: ExitReason,
        exit_ts: DateTime<Utc>,
    ) {
        self.exit_price = Some(exit_price);
        self.pnl_usdt = pnl_usdt;
        self.pnl_pct = pnl_pct;
        self.fees = fees;
        self.exit_reason = Some(reason);
        self.exit_ts = Some(exit_ts);
        // Round to the nearest second rather than truncating.
        self.duration_s =
            ((exit_ts - self.entry_ts).num_milliseconds() as f64 / 1000.0).round() as i64;
    }

    pub fn is_closed(&self) -> bool {
        self.exit_reason.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::PositionSide;

    fn make_position(side: PositionSide) -> OpenPosition {
        OpenPosition {
            trade_id: 1,
            setup_id: 1,
            symbol: "BTCUSDT".into(),
            side,
            entry_price: 95_000.0,
            quantity: 0.01,
            entry_time: Utc::now(),
        }
    }

    #[test]
    fn test_pnl_pct_long() {
        let pos = make_position(PositionSide::Long);
        let pnl = pos.pnl_pct(95_380.0); // +0.4%
        assert!((pnl - 0.004).abs() < 1e-9);
    }

    #[test]
    fn test_pnl_pct_short_inverts() {
        let pos = make_position(PositionSide::Short);
        let pnl = pos.pnl_pct(95_380.0);
        assert!((pnl + 0.004).abs() < 1e-9);
    }

    #[test]
    fn test_close_sets_duration() {
        let pos = make_position(PositionSide::Long);
        let mut record = TradeRecord::open(&pos, 0.02);
        let exit_ts = pos.entry_time + chrono::Duration::seconds(42);
        record.close(95_100.0, 1.0, 0.001, 0.04, ExitReason::TakeProfit, exit_ts);
        assert_eq!(record.duration_s, 42);
        assert!(record.is_closed());
        assert!(record.exit_ts.unwrap() >= record.entry_ts);
    }

    #[test]
    fn test_duration_rounds_to_nearest_second() {
        let pos = make_position(PositionSide::Long);

        let mut record = TradeRecord::open(&pos, 0.02);
        let exit_ts = pos.entry_time + chrono::Duration::milliseconds(149_600);
        record.close(95_100.0, 1.0, 0.001, 0.04, ExitReason::TimeStop, exit_ts);
        assert_eq!(record.duration_s, 150);

        let mut record = TradeRecord::open(&pos, 0.02);
        let exit_ts = pos.entry_time + chrono::Duration::milliseconds(149_400);
        record.close(95_100.0, 1.0, 0.001, 0.04, ExitReason::TimeStop, exit_ts);
        assert_eq!(record.duration_s, 149);
    }
}
