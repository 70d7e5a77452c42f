use serde::{Deserialize, Serialize};

/// Terminal status of an order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Expired,
    Rejected,
}

/// Result of a market or IOC order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub avg_price: f64,
    pub executed_qty: f64,
    pub status: OrderStatus,
    pub latency_ms: u64,
}

impl OrderFill {
    pub fn is_filled(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::PartiallyFilled)
            && self.executed_qty > 0.0
    }
}

/// A position as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    /// Positive = long, negative = short.
    pub signed_qty: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: u32,
}

impl VenuePosition {
    pub fn is_flat(&self) -> bool {
        self.signed_qty.abs() < 1e-12
    }
}
