use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::BotState;
use super::market::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// A structured log line bound for the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Gate decision breakdown for one liquidation, persisted whether or not
/// the setup passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEventRecord {
    pub setup_id: i64,
    pub symbol: String,
    pub liq_side: OrderSide,
    pub liq_price: f64,
    pub liq_quantity: f64,
    pub liq_notional: f64,
    pub liq_size_ok: bool,
    pub volume_ok: bool,
    pub spread_ok: bool,
    pub momentum_ok: bool,
    pub exhaustion_ok: bool,
    pub volume_mult_value: f64,
    pub spread_bps_value: f64,
    pub price_delta_value: f64,
    pub exhaustion_value: u32,
    pub risk_admitted: bool,
    pub passed: bool,
    pub rejection_reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time account and risk-day summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub equity: f64,
    pub pnl_today: f64,
    pub trade_count_today: u32,
    pub win_count: u32,
    pub loss_count: u32,
    pub consecutive_losses: u32,
    pub open_symbol: Option<String>,
    pub bot_state: BotState,
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat payload: state plus subsystem health flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: BotState,
    pub feed_connected: bool,
    pub adapter_reachable: bool,
    pub sink_healthy: bool,
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
