use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::execution::{ExecResult, ExecutionAdapter, ExecutionError};
use crate::feeds::cache::MarketCache;
use crate::models::market::OrderSide;
use crate::models::order::{OrderFill, OrderStatus, VenuePosition};

/// Adverse slippage range applied to synthesized fills, as fractions.
const SLIPPAGE_MIN: f64 = 0.0001; // 0.01%
const SLIPPAGE_MAX: f64 = 0.0003; // 0.03%

/// Paper execution: fills against the live mid with simulated slippage.
///
/// Keeps no position ledger of its own; the strategy engine's open-position
/// slot is the source of truth.
pub struct PaperAdapter {
    cache: Arc<MarketCache>,
    equity: f64,
}

impl PaperAdapter {
    pub fn new(cache: Arc<MarketCache>, equity: f64) -> Self {
        Self { cache, equity }
    }

    async fn fill_price(&self, symbol: &str, side: OrderSide) -> ExecResult<f64> {
        let mid = self
            .cache
            .reference_price(symbol)
            .await
            .ok_or_else(|| ExecutionError::NoMarketData(symbol.to_string()))?;

        let slip = rand::thread_rng().gen_range(SLIPPAGE_MIN..=SLIPPAGE_MAX);
        // Slippage is always adverse: buys pay up, sells hit down.
        let price = match side {
            OrderSide::Buy => mid * (1.0 + slip),
            OrderSide::Sell => mid * (1.0 - slip),
        };
        Ok(price)
    }
}

#[async_trait]
impl ExecutionAdapter for PaperAdapter {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExecResult<()> {
        debug!("Paper: set_leverage {symbol} {leverage}x (no-op)");
        Ok(())
    }

    async fn get_equity(&self) -> ExecResult<f64> {
        Ok(self.equity)
    }

    async fn get_positions(&self) -> ExecResult<Vec<VenuePosition>> {
        Ok(Vec::new())
    }

    async fn market_order(&self, symbol: &str, side: OrderSide, qty: f64) -> ExecResult<OrderFill> {
        let price = self.fill_price(symbol, side).await?;
        debug!("Paper: {} {} {:.6} @ {:.2}", side.as_str(), symbol, qty, price);
        Ok(OrderFill {
            avg_price: price,
            executed_qty: qty,
            status: OrderStatus::Filled,
            latency_ms: 0,
        })
    }

    async fn limit_ioc(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
    ) -> ExecResult<OrderFill> {
        let mid = self
            .cache
            .reference_price(symbol)
            .await
            .ok_or_else(|| ExecutionError::NoMarketData(symbol.to_string()))?;

        // The order fills only when the limit crosses the current mid.
        let crosses = match side {
            OrderSide::Buy => price >= mid,
            OrderSide::Sell => price <= mid,
        };
        if !crosses {
            return Ok(OrderFill {
                avg_price: 0.0,
                executed_qty: 0.0,
                status: OrderStatus::Expired,
                latency_ms: 0,
            });
        }

        let fill = self.fill_price(symbol, side).await?;
        // Never worse than the limit.
        let avg_price = match side {
            OrderSide::Buy => fill.min(price),
            OrderSide::Sell => fill.max(price),
        };
        Ok(OrderFill {
            avg_price,
            executed_qty: qty,
            status: OrderStatus::Filled,
            latency_ms: 0,
        })
    }

    async fn close_all(&self) -> ExecResult<()> {
        // No venue-side ledger to unwind.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::BookTicker;
    use chrono::Utc;

    async fn cache_with_mid(mid: f64) -> Arc<MarketCache> {
        let cache = Arc::new(MarketCache::new());
        cache
            .on_book(BookTicker {
                symbol: "BTCUSDT".into(),
                bid_price: mid - 5.0,
                bid_qty: 1.0,
                ask_price: mid + 5.0,
                ask_qty: 1.0,
                timestamp: Utc::now(),
            })
            .await;
        cache
    }

    #[tokio::test]
    async fn test_buy_slippage_is_adverse_and_bounded() {
        let cache = cache_with_mid(95_000.0).await;
        let adapter = PaperAdapter::new(cache, 1400.0);

        for _ in 0..50 {
            let fill = adapter
                .market_order("BTCUSDT", OrderSide::Buy, 0.01)
                .await
                .unwrap();
            let slip = (fill.avg_price - 95_000.0) / 95_000.0;
            assert!(slip >= SLIPPAGE_MIN - 1e-12 && slip <= SLIPPAGE_MAX + 1e-12);
            assert_eq!(fill.latency_ms, 0);
            assert!(fill.is_filled());
        }
    }

    #[tokio::test]
    async fn test_sell_slippage_is_adverse() {
        let cache = cache_with_mid(95_000.0).await;
        let adapter = PaperAdapter::new(cache, 1400.0);
        let fill = adapter
            .market_order("BTCUSDT", OrderSide::Sell, 0.01)
            .await
            .unwrap();
        assert!(fill.avg_price < 95_000.0);
    }

    #[tokio::test]
    async fn test_no_market_data() {
        let cache = Arc::new(MarketCache::new());
        let adapter = PaperAdapter::new(cache, 1400.0);
        let err = adapter
            .market_order("BTCUSDT", OrderSide::Buy, 0.01)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NoMarketData(_)));
    }

    #[tokio::test]
    async fn test_ioc_expires_when_not_crossing() {
        let cache = cache_with_mid(95_000.0).await;
        let adapter = PaperAdapter::new(cache, 1400.0);
        let fill = adapter
            .limit_ioc("BTCUSDT", OrderSide::Buy, 0.01, 94_000.0)
            .await
            .unwrap();
        assert_eq!(fill.status, OrderStatus::Expired);
        assert_eq!(fill.executed_qty, 0.0);
    }
}
