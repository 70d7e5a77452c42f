use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side of a venue order (taker direction for liquidations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

/// Direction of a held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// Order side that opens this position.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes this position.
    pub fn exit_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }

    /// Reversion direction against a forced order: a SELL liquidation
    /// (longs being closed out) is faded with a LONG.
    pub fn reversion_of(liq_side: OrderSide) -> Self {
        match liq_side {
            OrderSide::Sell => PositionSide::Long,
            OrderSide::Buy => PositionSide::Short,
        }
    }
}

/// A forced-order event from the venue's liquidation stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

impl LiquidationEvent {
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// An aggregate trade print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Top-of-book snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTicker {
    pub symbol: String,
    pub bid_price: f64,
    pub bid_qty: f64,
    pub ask_price: f64,
    pub ask_qty: f64,
    pub timestamp: DateTime<Utc>,
}

impl BookTicker {
    pub fn mid(&self) -> f64 {
        (self.bid_price + self.ask_price) / 2.0
    }

    /// (ask - bid) / mid in basis points.
    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid <= 0.0 {
            return f64::INFINITY;
        }
        (self.ask_price - self.bid_price) / mid * 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversion_side() {
        assert_eq!(PositionSide::reversion_of(OrderSide::Sell), PositionSide::Long);
        assert_eq!(PositionSide::reversion_of(OrderSide::Buy), PositionSide::Short);
    }

    #[test]
    fn test_spread_bps() {
        let book = BookTicker {
            symbol: "BTCUSDT".into(),
            bid_price: 94_990.0,
            bid_qty: 1.0,
            ask_price: 95_010.0,
            ask_qty: 1.0,
            timestamp: Utc::now(),
        };
        // 20 / 95000 * 10000 ≈ 2.105 bps
        assert!((book.spread_bps() - 2.105).abs() < 0.01);
    }
}
