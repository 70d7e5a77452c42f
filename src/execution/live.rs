use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::BinanceConfig;
use crate::execution::signer::RequestSigner;
use crate::execution::{ExecResult, ExecutionAdapter, ExecutionError};
use crate::models::market::OrderSide;
use crate::models::order::{OrderFill, OrderStatus, VenuePosition};

const HTTP_TIMEOUT_SECS: u64 = 10;

/// Authenticated REST adapter for the venue's USDT-M futures API.
pub struct LiveAdapter {
    http: reqwest::Client,
    signer: RequestSigner,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct PositionRiskEntry {
    symbol: String,
    #[serde(rename = "positionAmt")]
    position_amt: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: String,
    leverage: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "avgPrice")]
    avg_price: Option<String>,
    #[serde(rename = "executedQty")]
    executed_qty: Option<String>,
    status: Option<String>,
}

impl LiveAdapter {
    /// Build the adapter. The testnet base URL is used only when the bot is
    /// in paper mode *and* the operator supplied testnet credentials;
    /// otherwise all requests go at production.
    pub fn new(config: &BinanceConfig, paper_mode: bool) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(std::time::Duration::from_secs(30)))
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        let base_url = if paper_mode && config.use_testnet && !config.api_key.is_empty() {
            info!("Adapter: routing orders at the futures testnet");
            config.testnet_rest_url.clone()
        } else {
            config.rest_url.clone()
        };

        Self {
            http,
            signer: RequestSigner::new(config.api_secret.clone()),
            api_key: config.api_key.clone(),
            base_url,
        }
    }

    /// Unsigned reachability probe against the exchange-info endpoint.
    pub async fn ping(&self) -> ExecResult<()> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExecutionError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ExecutionError::Network(format!(
                "exchangeInfo status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExecResult<serde_json::Value> {
        let query = self
            .signer
            .signed_query(params, Utc::now().timestamp_millis());
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExecutionError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ExecutionError::Network(e.to_string()))?;

        if status.is_client_error() {
            // 4xx carries a business reason; surface the payload.
            return Err(ExecutionError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(ExecutionError::Network(format!("{status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| ExecutionError::Network(format!("bad body: {e}")))
    }

    fn parse_fill(value: serde_json::Value, latency_ms: u64) -> ExecResult<OrderFill> {
        let resp: OrderResponse = serde_json::from_value(value)
            .map_err(|e| ExecutionError::Network(format!("bad order response: {e}")))?;

        let status = match resp.status.as_deref() {
            Some("FILLED") => OrderStatus::Filled,
            Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
            Some("EXPIRED") | Some("EXPIRED_IN_MATCH") => OrderStatus::Expired,
            Some("REJECTED") => OrderStatus::Rejected,
            other => {
                warn!("Adapter: unexpected order status {other:?}");
                OrderStatus::Expired
            }
        };

        Ok(OrderFill {
            avg_price: resp
                .avg_price
                .and_then(|p| p.parse().ok())
                .unwrap_or(0.0),
            executed_qty: resp
                .executed_qty
                .and_then(|q| q.parse().ok())
                .unwrap_or(0.0),
            status,
            latency_ms,
        })
    }
}

#[async_trait]
impl ExecutionAdapter for LiveAdapter {
    fn name(&self) -> &'static str {
        "live"
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExecResult<()> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        self.signed_request(reqwest::Method::POST, "/fapi/v1/leverage", &params)
            .await?;
        info!("Adapter: leverage {symbol} set to {leverage}x");
        Ok(())
    }

    async fn get_equity(&self) -> ExecResult<f64> {
        let value = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/balance", &[])
            .await?;
        let entries: Vec<BalanceEntry> = serde_json::from_value(value)
            .map_err(|e| ExecutionError::Network(format!("bad balance response: {e}")))?;

        entries
            .iter()
            .find(|e| e.asset == "USDT")
            .and_then(|e| e.balance.parse().ok())
            .ok_or_else(|| ExecutionError::Network("no USDT balance entry".into()))
    }

    async fn get_positions(&self) -> ExecResult<Vec<VenuePosition>> {
        let value = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/positionRisk", &[])
            .await?;
        let entries: Vec<PositionRiskEntry> = serde_json::from_value(value)
            .map_err(|e| ExecutionError::Network(format!("bad positionRisk response: {e}")))?;

        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let signed_qty: f64 = e.position_amt.parse().ok()?;
                if signed_qty.abs() < 1e-12 {
                    return None;
                }
                Some(VenuePosition {
                    symbol: e.symbol,
                    signed_qty,
                    entry_price: e.entry_price.parse().ok()?,
                    unrealized_pnl: e.unrealized_profit.parse().unwrap_or(0.0),
                    leverage: e.leverage.parse().unwrap_or(1),
                })
            })
            .collect())
    }

    async fn market_order(&self, symbol: &str, side: OrderSide, qty: f64) -> ExecResult<OrderFill> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format!("{qty}")),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        let started = Instant::now();
        let value = self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", &params)
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        debug!("Adapter: market {} {} {:.6} in {}ms", side.as_str(), symbol, qty, latency_ms);
        Self::parse_fill(value, latency_ms)
    }

    async fn limit_ioc(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        price: f64,
    ) -> ExecResult<OrderFill> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "IOC".to_string()),
            ("quantity", format!("{qty}")),
            ("price", format!("{price}")),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        let started = Instant::now();
        let value = self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", &params)
            .await?;
        Self::parse_fill(value, started.elapsed().as_millis() as u64)
    }

    async fn close_all(&self) -> ExecResult<()> {
        let positions = self.get_positions().await?;
        for pos in positions {
            let side = if pos.signed_qty > 0.0 {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let qty = pos.signed_qty.abs();
            warn!("Adapter: close_all {} {} {:.6}", side.as_str(), pos.symbol, qty);

            let params = [
                ("symbol", pos.symbol.clone()),
                ("side", side.as_str().to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", format!("{qty}")),
                ("reduceOnly", "true".to_string()),
                ("newOrderRespType", "RESULT".to_string()),
            ];
            self.signed_request(reqwest::Method::POST, "/fapi/v1/order", &params)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fill_statuses() {
        let value = serde_json::json!({
            "avgPrice": "95012.5",
            "executedQty": "0.010",
            "status": "FILLED"
        });
        let fill = LiveAdapter::parse_fill(value, 42).unwrap();
        assert_eq!(fill.status, OrderStatus::Filled);
        assert_eq!(fill.avg_price, 95_012.5);
        assert_eq!(fill.executed_qty, 0.010);
        assert_eq!(fill.latency_ms, 42);

        let value = serde_json::json!({"status": "EXPIRED"});
        let fill = LiveAdapter::parse_fill(value, 0).unwrap();
        assert_eq!(fill.status, OrderStatus::Expired);
        assert!(!fill.is_filled());
    }

    #[test]
    fn test_testnet_gating() {
        let mut config = BinanceConfig::default();
        config.api_key = "k".into();
        config.use_testnet = true;

        let adapter = LiveAdapter::new(&config, true);
        assert!(adapter.base_url.contains("testnet"));

        // Live mode never routes at the testnet.
        let adapter = LiveAdapter::new(&config, false);
        assert!(!adapter.base_url.contains("testnet"));
    }
}
