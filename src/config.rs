use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::event::TradingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: TradingMode,
    pub binance: BinanceConfig,
    pub gate: GateConfig,
    pub risk: RiskConfig,
    pub exits: ExitConfig,
    pub sink: SinkConfig,
    pub telemetry: TelemetryConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    pub ws_url: String,
    pub rest_url: String,
    pub testnet_rest_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Set to true together with testnet credentials to route paper-mode
    /// REST calls at the testnet instead of production.
    pub use_testnet: bool,
    pub symbols: Vec<String>,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_secs: u64,
    pub ping_interval_secs: u64,
}

/// Signal-quality thresholds for the liquidation entry gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Trailing window for accumulating cascade notional per symbol.
    pub liq_window_seconds: u64,            // [30, 120]
    pub min_liq_usd: HashMap<String, f64>,  // per symbol
    /// Minimum volume-window samples before the baseline is trusted.
    pub volume_lookback: usize,             // [10, 50]
    pub volume_mult: f64,                   // [1.5, 5]
    pub exhaustion_candles: u32,            // [1, 5]
    pub max_spread_bps: HashMap<String, f64>, // per symbol
    pub symbol_cooldown_seconds: u64,       // [60, 600]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub leverage: u32,                              // [1, 3]
    pub risk_per_trade_pct: f64,                    // [0.001, 0.01]
    pub daily_max_loss_pct: f64,                    // [0.005, 0.05]
    pub max_trades_per_day: u32,                    // [1, 20]
    pub max_consecutive_losses: u32,                // [1, 10]
    pub pause_after_consecutive_losses_minutes: u64, // [15, 180]
    pub max_margin_per_trade_pct: f64,              // [0.05, 0.5]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    pub tp_pct: f64,               // [0.0025, 0.0045]
    pub sl_pct: f64,               // [0.0035, 0.0050]
    pub time_stop_seconds: i64,    // [120, 180]
    pub entry_fill_timeout_ms: u64, // [200, 2000]
    pub use_market_if_not_filled: bool,
    /// Placeholder taker-fee estimate: fees = |pnl| * this factor.
    pub taker_fee_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub database_url: Option<String>,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub alert_on_trade: bool,
    pub alert_on_pause: bool,
    pub alert_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Adds SOLUSDT to the symbol set.
    pub enable_extra_symbol: bool,
    /// Momentum-continuation variant of the gate (reserved, off by default).
    pub enable_momentum_variant: bool,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://fstream.binance.com".into(),
            rest_url: "https://fapi.binance.com".into(),
            testnet_rest_url: "https://testnet.binancefuture.com".into(),
            api_key: String::new(),
            api_secret: String::new(),
            use_testnet: false,
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()],
            max_reconnect_attempts: 10,
            reconnect_base_delay_secs: 1,
            ping_interval_secs: 30,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        let mut min_liq_usd = HashMap::new();
        min_liq_usd.insert("BTCUSDT".to_string(), 500_000.0);
        min_liq_usd.insert("ETHUSDT".to_string(), 250_000.0);
        min_liq_usd.insert("SOLUSDT".to_string(), 100_000.0);

        let mut max_spread_bps = HashMap::new();
        max_spread_bps.insert("BTCUSDT".to_string(), 3.0);
        max_spread_bps.insert("ETHUSDT".to_string(), 4.0);
        max_spread_bps.insert("SOLUSDT".to_string(), 6.0);

        // The 60s volume surge window spans 600 of the 1000 kept samples,
        // which caps the reachable multiple near 1.67; the threshold sits
        // at the low end of its range to stay satisfiable.
        Self {
            liq_window_seconds: 60,
            min_liq_usd,
            volume_lookback: 30,
            volume_mult: 1.5,
            exhaustion_candles: 1,
            max_spread_bps,
            symbol_cooldown_seconds: 180,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            leverage: 2,
            risk_per_trade_pct: 0.005,
            daily_max_loss_pct: 0.02,
            max_trades_per_day: 10,
            max_consecutive_losses: 3,
            pause_after_consecutive_losses_minutes: 60,
            max_margin_per_trade_pct: 0.25,
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            tp_pct: 0.0035,
            sl_pct: 0.0045,
            time_stop_seconds: 150,
            entry_fill_timeout_ms: 1000,
            use_market_if_not_filled: true,
            taker_fee_factor: 0.04,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            queue_capacity: 4096,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            discord_webhook_url: None,
            alert_on_trade: true,
            alert_on_pause: true,
            alert_on_error: true,
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_extra_symbol: false,
            enable_momentum_variant: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            binance: BinanceConfig::default(),
            gate: GateConfig::default(),
            risk: RiskConfig::default(),
            exits: ExitConfig::default(),
            sink: SinkConfig::default(),
            telemetry: TelemetryConfig::default(),
            features: FeatureFlags::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Required for live mode:
    ///   BINANCE_API_KEY, BINANCE_API_SECRET — venue credentials
    ///   DATABASE_URL — Postgres sink
    ///
    /// Optional:
    ///   TRADING_MODE — "paper" (default) or "live"
    ///   BINANCE_TESTNET — "true" to route paper REST calls at the testnet
    ///   TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID, DISCORD_WEBHOOK_URL — alerts
    ///   RUST_LOG — log level (default: info)
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();

        if let Ok(mode) = std::env::var("TRADING_MODE") {
            if let Some(m) = TradingMode::parse(&mode) {
                config.mode = m;
            }
        }

        if let Ok(key) = std::env::var("BINANCE_API_KEY") {
            config.binance.api_key = key;
        }
        if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
            config.binance.api_secret = secret;
        }
        if let Ok(testnet) = std::env::var("BINANCE_TESTNET") {
            config.binance.use_testnet = testnet == "true" || testnet == "1";
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.sink.database_url = Some(url);
            }
        }

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                config.telemetry.telegram_bot_token = Some(token);
            }
        }
        if let Ok(chat) = std::env::var("TELEGRAM_CHAT_ID") {
            if !chat.is_empty() {
                config.telemetry.telegram_chat_id = Some(chat);
            }
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_URL") {
            if !url.is_empty() {
                config.telemetry.discord_webhook_url = Some(url);
            }
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.telemetry.log_level = level;
        }

        if let Ok(flag) = std::env::var("ENABLE_EXTRA_SYMBOL") {
            config.features.enable_extra_symbol = flag == "true" || flag == "1";
        }

        if config.features.enable_extra_symbol
            && !config.binance.symbols.iter().any(|s| s == "SOLUSDT")
        {
            config.binance.symbols.push("SOLUSDT".to_string());
        }

        config
    }

    pub fn is_paper(&self) -> bool {
        self.mode == TradingMode::Paper
    }

    /// Paper-mode starting equity from the environment, defaulting to 1000.
    pub fn starting_capital() -> f64 {
        std::env::var("STARTING_CAPITAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000.0)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == TradingMode::Live {
            anyhow::ensure!(
                !self.binance.api_key.is_empty() && !self.binance.api_secret.is_empty(),
                "BINANCE_API_KEY and BINANCE_API_SECRET must be set for live mode"
            );
            anyhow::ensure!(
                self.sink.database_url.is_some(),
                "DATABASE_URL must be set for live mode"
            );
        }

        anyhow::ensure!(
            !self.binance.symbols.is_empty() && self.binance.symbols.len() <= 3,
            "symbol set must contain 1-3 symbols"
        );
        for sym in &self.binance.symbols {
            anyhow::ensure!(
                self.gate.min_liq_usd.contains_key(sym),
                "min_liq_usd missing for {sym}"
            );
            anyhow::ensure!(
                self.gate.max_spread_bps.contains_key(sym),
                "max_spread_bps missing for {sym}"
            );
        }

        let r = &self.risk;
        anyhow::ensure!((1..=3).contains(&r.leverage), "leverage must be in [1, 3]");
        anyhow::ensure!(
            (0.001..=0.01).contains(&r.risk_per_trade_pct),
            "risk_per_trade_pct must be in [0.001, 0.01]"
        );
        anyhow::ensure!(
            (0.005..=0.05).contains(&r.daily_max_loss_pct),
            "daily_max_loss_pct must be in [0.005, 0.05]"
        );
        anyhow::ensure!(
            (1..=20).contains(&r.max_trades_per_day),
            "max_trades_per_day must be in [1, 20]"
        );
        anyhow::ensure!(
            (1..=10).contains(&r.max_consecutive_losses),
            "max_consecutive_losses must be in [1, 10]"
        );
        anyhow::ensure!(
            (15..=180).contains(&r.pause_after_consecutive_losses_minutes),
            "pause_after_consecutive_losses_minutes must be in [15, 180]"
        );
        anyhow::ensure!(
            (0.05..=0.5).contains(&r.max_margin_per_trade_pct),
            "max_margin_per_trade_pct must be in [0.05, 0.5]"
        );

        let g = &self.gate;
        anyhow::ensure!(
            (30..=120).contains(&g.liq_window_seconds),
            "liq_window_seconds must be in [30, 120]"
        );
        anyhow::ensure!(
            (10..=50).contains(&g.volume_lookback),
            "volume_lookback must be in [10, 50]"
        );
        anyhow::ensure!(
            (1.5..=5.0).contains(&g.volume_mult),
            "volume_mult must be in [1.5, 5]"
        );
        anyhow::ensure!(
            (1..=5).contains(&g.exhaustion_candles),
            "exhaustion_candles must be in [1, 5]"
        );
        anyhow::ensure!(
            (60..=600).contains(&g.symbol_cooldown_seconds),
            "symbol_cooldown_seconds must be in [60, 600]"
        );

        let e = &self.exits;
        anyhow::ensure!(
            (0.0025..=0.0045).contains(&e.tp_pct),
            "tp_pct must be in [0.0025, 0.0045]"
        );
        anyhow::ensure!(
            (0.0035..=0.0050).contains(&e.sl_pct),
            "sl_pct must be in [0.0035, 0.0050]"
        );
        anyhow::ensure!(
            (120..=180).contains(&e.time_stop_seconds),
            "time_stop_seconds must be in [120, 180]"
        );
        anyhow::ensure!(
            (200..=2000).contains(&e.entry_fill_timeout_ms),
            "entry_fill_timeout_ms must be in [200, 2000]"
        );

        anyhow::ensure!(
            self.sink.queue_capacity >= 64,
            "sink queue_capacity too small"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut config = Config::default();
        config.risk.leverage = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.exits.tp_pct = 0.01;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_live_requires_credentials() {
        let mut config = Config::default();
        config.mode = TradingMode::Live;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_symbol_thresholds_required() {
        let mut config = Config::default();
        config.binance.symbols.push("DOGEUSDT".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let reloaded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.mode, config.mode);
        assert_eq!(reloaded.gate.volume_mult, config.gate.volume_mult);
        assert_eq!(reloaded.risk.max_trades_per_day, config.risk.max_trades_per_day);
        assert_eq!(reloaded.exits.tp_pct, config.exits.tp_pct);
        assert!(reloaded.validate().is_ok());
    }
}
