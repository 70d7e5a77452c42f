pub mod live;
pub mod paper;
pub mod signer;

use async_trait::async_trait;

use crate::models::market::OrderSide;
use crate::models::order::{OrderFill, VenuePosition};

/// Errors from the execution layer, split so the engine can tell a
/// retryable transport failure from a terminal venue rejection.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// 4xx with a business reason. Not retryable.
    #[error("venue rejection: {0}")]
    Rejected(String),
    /// Timeout, 5xx, connection failure. Retryable.
    #[error("network error: {0}")]
    Network(String),
    /// No usable price to fill or value against.
    #[error("no market data for {0}")]
    NoMarketData(String),
}

pub type ExecResult<T> = Result<T, ExecutionError>;

/// Venue execution capability. Paper and live implementations are
/// interchangeable behind this trait; the strategy engine never knows
/// which one it holds.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExecResult<()>;

    /// Account equity in the quote currency.
    async fn get_equity(&self) -> ExecResult<f64>;

    async fn get_positions(&self) -> ExecResult<Vec<VenuePosition>>;

    async fn market_order(&self, symbol: &str, side: OrderSide, qty: f64) -> ExecResult<OrderFill>;

    /// Immediate-or-cancel limit order; unfilled quantity is cancelled.
    async fn limit_ioc(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
    ) -> ExecResult<OrderFill>;

    /// Submit opposing market orders for every open venue position.
    async fn close_all(&self) -> ExecResult<()>;
}
