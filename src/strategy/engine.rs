use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::execution::{ExecutionAdapter, ExecutionError};
use crate::feeds::cache::{MarketCache, SymbolSnapshot};
use crate::models::event::{BotState, Command, Event, TradingMode};
use crate::models::market::{LiquidationEvent, PositionSide};
use crate::models::order::OrderFill;
use crate::models::position::{ExitReason, OpenPosition, TradeRecord};
use crate::models::record::{HealthStatus, LogLevel, MarketEventRecord, MetricsSnapshot};
use crate::risk::governor::{Decision, RiskGovernor};
use crate::risk::sizing;
use crate::signals::rolling;
use crate::sink::SinkHandle;
use crate::strategy::gate;
use crate::telemetry::alerts::AlertManager;
use crate::telemetry::latency::LatencyTracker;

/// Consecutive exit failures tolerated before the bot enters ERROR.
const MAX_EXIT_FAILURES: u32 = 5;
/// Time budget for the shutdown flatten.
const FLATTEN_BUDGET_SECS: u64 = 10;

/// Exit rule for a monitored position, first match wins: take-profit,
/// stop-loss, then the time stop.
pub fn exit_decision(
    pnl_pct: f64,
    held_secs: i64,
    exits: &crate::config::ExitConfig,
) -> Option<ExitReason> {
    if pnl_pct >= exits.tp_pct {
        Some(ExitReason::TakeProfit)
    } else if pnl_pct <= -exits.sl_pct {
        Some(ExitReason::StopLoss)
    } else if held_secs >= exits.time_stop_seconds {
        Some(ExitReason::TimeStop)
    } else {
        None
    }
}

/// The strategy core: one logical task owning the bot state machine, the
/// single open-position slot, the risk day and the cooldown map.
///
/// All mutation happens through `handle_event`, fed by the mailbox; the
/// feed, the tick producers and the control poller never touch this state
/// directly.
pub struct StrategyEngine {
    config: Config,
    cache: Arc<MarketCache>,
    paper: Arc<dyn ExecutionAdapter>,
    live: Option<Arc<dyn ExecutionAdapter>>,
    mode: TradingMode,
    governor: RiskGovernor,
    sink: SinkHandle,
    alerts: Arc<AlertManager>,
    latency: Arc<LatencyTracker>,

    state: BotState,
    position: Option<OpenPosition>,
    open_slippage_est_pct: f64,
    cooldown_until: HashMap<String, DateTime<Utc>>,
    /// Per-symbol forced-order notionals inside the trailing cascade window.
    liq_window: HashMap<String, VecDeque<(f64, DateTime<Utc>)>>,
    next_trade_id: i64,
    next_setup_id: i64,
    exit_failures: u32,
    adapter_ok: bool,
    last_error: Option<String>,
}

impl StrategyEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        cache: Arc<MarketCache>,
        paper: Arc<dyn ExecutionAdapter>,
        live: Option<Arc<dyn ExecutionAdapter>>,
        governor: RiskGovernor,
        sink: SinkHandle,
        alerts: Arc<AlertManager>,
        latency: Arc<LatencyTracker>,
    ) -> Self {
        let mode = config.mode;
        Self {
            config,
            cache,
            paper,
            live,
            mode,
            governor,
            sink,
            alerts,
            latency,
            state: BotState::Booting,
            position: None,
            open_slippage_est_pct: 0.0,
            cooldown_until: HashMap::new(),
            liq_window: HashMap::new(),
            next_trade_id: 1,
            next_setup_id: 1,
            exit_failures: 0,
            adapter_ok: true,
            last_error: None,
        }
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    pub fn position(&self) -> Option<&OpenPosition> {
        self.position.as_ref()
    }

    pub fn governor(&self) -> &RiskGovernor {
        &self.governor
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    fn current_adapter(&self) -> Arc<dyn ExecutionAdapter> {
        match self.mode {
            TradingMode::Live => self.live.clone().unwrap_or_else(|| self.paper.clone()),
            TradingMode::Paper => self.paper.clone(),
        }
    }

    /// Finish boot: configure leverage on the venue (live only), persist the
    /// active config, and enter RUNNING.
    pub async fn boot(&mut self) {
        if self.mode == TradingMode::Live {
            let adapter = self.current_adapter();
            for symbol in &self.config.binance.symbols.clone() {
                if let Err(e) = adapter.set_leverage(symbol, self.config.risk.leverage).await {
                    error!("Boot: leverage setup failed for {symbol}: {e}");
                    self.set_error(format!("leverage setup failed: {e}"));
                    return;
                }
            }
        }

        match serde_json::to_string(&self.config) {
            Ok(payload) => self.sink.config(payload),
            Err(e) => warn!("Boot: config serialization failed: {e}"),
        }

        self.transition(BotState::Running, "boot complete");
    }

    /// Consume the mailbox until shutdown. This is the single consumer; all
    /// streams funnel here so arrival order is processing order.
    pub async fn run(mut self, mut mailbox: mpsc::Receiver<Event>) {
        while let Some(event) = mailbox.recv().await {
            if matches!(event, Event::Shutdown) {
                self.shutdown().await;
                break;
            }
            self.handle_event(event).await;
        }
        info!("Engine: mailbox closed, exiting");
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Liquidation(liq) => self.on_liquidation(liq).await,
            Event::MonitorTick => self.on_monitor_tick().await,
            Event::HeartbeatTick => self.on_heartbeat().await,
            Event::Command(cmd) => self.on_command(cmd).await,
            Event::FeedUnavailable => self.on_feed_unavailable().await,
            Event::Shutdown => self.shutdown().await,
        }
    }

    // ------------------------------------------------------------------
    // Entry path
    // ------------------------------------------------------------------

    async fn on_liquidation(&mut self, liq: LiquidationEvent) {
        let now = Utc::now();
        self.refresh_risk_state(now).await;

        // Cascades keep accumulating even when no entry can happen.
        let window_notional = self.note_liquidation(&liq, now);

        // Entries are evaluated only while RUNNING and flat.
        if !self.state.accepts_entries() || self.position.is_some() {
            return;
        }

        // Cooldown suppression is silent: no market event is recorded.
        if let Some(until) = self.cooldown_until.get(&liq.symbol) {
            if now < *until {
                debug!("Gate: {} in cooldown until {until}", liq.symbol);
                return;
            }
        }

        let snap = match self.cache.snapshot(&liq.symbol).await {
            Some(snap) => snap,
            None => SymbolSnapshot {
                symbol: liq.symbol.clone(),
                state: Default::default(),
                taken_at: now,
            },
        };

        let setup_id = self.next_setup_id;
        self.next_setup_id += 1;

        let outcome = gate::evaluate(&self.config.gate, &liq, &snap, window_notional);
        let decision = self.governor.admit();
        let risk_admitted = decision == Decision::Admit;
        let signal_passed = outcome.signal_quality_passed();
        let passed = signal_passed && risk_admitted;

        let mut reasons = outcome.reasons.clone();
        match &decision {
            Decision::RejectSignal(r) | Decision::RejectAndPause(r) => {
                reasons.extend(r.iter().cloned())
            }
            Decision::Admit => {}
        }

        let record = MarketEventRecord {
            setup_id,
            symbol: liq.symbol.clone(),
            liq_side: liq.side,
            liq_price: liq.price,
            liq_quantity: liq.quantity,
            liq_notional: liq.notional(),
            liq_size_ok: outcome.liq_size_ok,
            volume_ok: outcome.volume_ok,
            spread_ok: outcome.spread_ok,
            momentum_ok: outcome.momentum_ok,
            exhaustion_ok: outcome.exhaustion_ok,
            volume_mult_value: outcome.volume_mult_value,
            spread_bps_value: outcome.spread_bps_value,
            price_delta_value: outcome.price_delta_value,
            exhaustion_value: outcome.exhaustion_value,
            risk_admitted,
            passed,
            rejection_reason: reasons.join("; "),
            timestamp: now,
        };
        self.sink.market_event(record).await;

        if let Decision::RejectAndPause(pause_reasons) = &decision {
            let reason = pause_reasons.join("; ");
            warn!("Risk: pausing ({reason})");
            self.governor.start_pause(now);
            self.transition(BotState::PausedRiskLimit, &reason);
            self.alerts.on_pause(&reason).await;
            return;
        }

        if !passed {
            debug!(
                "Gate: {} rejected: {}",
                liq.symbol,
                reasons.join("; ")
            );
            return;
        }

        let side = PositionSide::reversion_of(liq.side);
        let Some(entry_ref) = rolling::mid(&snap) else {
            // Spread check passed so the book should be here; without a
            // reference there is nothing safe to size against.
            warn!("Gate: {} passed but no mid price, dropping", liq.symbol);
            return;
        };

        let qty = sizing::position_quantity(
            &self.config.risk,
            self.governor.equity_baseline(),
            entry_ref,
            self.config.exits.sl_pct,
        );
        if qty <= 0.0 {
            warn!("Sizing: degenerate quantity for {}, dropping", liq.symbol);
            return;
        }

        info!(
            "Entry: {} {} qty={:.6} ref={:.2} (liq ${:.0} {})",
            side.as_str(),
            liq.symbol,
            qty,
            entry_ref,
            liq.notional(),
            liq.side.as_str()
        );

        let Some(fill) = self.submit_entry(&liq.symbol, side, qty).await else {
            return; // setup abandoned, no position opened
        };

        let entry_time = Utc::now();
        let trade_id = self.next_trade_id;
        self.next_trade_id += 1;

        if self.position.is_some() {
            self.invariant_violation("entry fill while a position is already open");
            return;
        }

        let position = OpenPosition {
            trade_id,
            setup_id,
            symbol: liq.symbol.clone(),
            side,
            entry_price: fill.avg_price,
            quantity: fill.executed_qty,
            entry_time,
        };
        self.open_slippage_est_pct = if entry_ref > 0.0 {
            (fill.avg_price - entry_ref).abs() / entry_ref * 100.0
        } else {
            0.0
        };

        self.cooldown_until.insert(
            liq.symbol.clone(),
            entry_time + chrono::Duration::seconds(self.config.gate.symbol_cooldown_seconds as i64),
        );
        self.governor.on_trade_opened();
        self.latency
            .record("entry_order", Duration::from_millis(fill.latency_ms));

        let record = TradeRecord::open(&position, self.open_slippage_est_pct);
        self.position = Some(position);
        self.sink.trade_opened(record).await;
        self.sink.log(
            LogLevel::Info,
            format!(
                "Opened {} {} qty={:.6} @ {:.2}",
                side.as_str(),
                liq.symbol,
                fill.executed_qty,
                fill.avg_price
            ),
        );
    }

    /// Roll this forced order into the symbol's cascade window and return
    /// the windowed notional, this event included.
    fn note_liquidation(&mut self, liq: &LiquidationEvent, now: DateTime<Utc>) -> f64 {
        let horizon =
            now - chrono::Duration::seconds(self.config.gate.liq_window_seconds as i64);
        let window = self.liq_window.entry(liq.symbol.clone()).or_default();
        while let Some((_, ts)) = window.front() {
            if *ts < horizon {
                window.pop_front();
            } else {
                break;
            }
        }
        window.push_back((liq.notional(), liq.timestamp));
        window.iter().map(|(notional, _)| notional).sum()
    }

    /// Submit the entry market order, bounded by the fill timeout. A timed-
    /// out attempt is retried once when `use_market_if_not_filled` is set;
    /// everything else abandons the setup; entries never retry on errors.
    async fn submit_entry(&mut self, symbol: &str, side: PositionSide, qty: f64) -> Option<OrderFill> {
        let adapter = self.current_adapter();
        let order_side = side.entry_order_side();
        let timeout = Duration::from_millis(self.config.exits.entry_fill_timeout_ms);
        let attempts = if self.config.exits.use_market_if_not_filled {
            2
        } else {
            1
        };

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, adapter.market_order(symbol, order_side, qty)).await
            {
                Ok(Ok(fill)) if fill.is_filled() => {
                    self.adapter_ok = true;
                    return Some(fill);
                }
                Ok(Ok(_)) => {
                    debug!("Entry: order unfilled for {symbol} (attempt {attempt})");
                }
                Ok(Err(ExecutionError::Rejected(msg))) => {
                    error!("Entry: venue rejected {symbol}: {msg}");
                    self.sink
                        .log(LogLevel::Error, format!("Entry rejected: {msg}"));
                    return None;
                }
                Ok(Err(e)) => {
                    self.adapter_ok = false;
                    warn!("Entry: adapter error for {symbol}: {e}");
                    return None;
                }
                Err(_) => {
                    self.adapter_ok = false;
                    warn!("Entry: fill timeout for {symbol} (attempt {attempt})");
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Exit path
    // ------------------------------------------------------------------

    /// Evaluate exits for the open position. Runs on every 100 ms tick,
    /// in every state, so an ERROR'd or paused bot still manages its exposure.
    async fn on_monitor_tick(&mut self) {
        let now = Utc::now();
        self.refresh_risk_state(now).await;

        let Some(pos) = self.position.clone() else {
            return;
        };
        let Some(price) = self.cache.reference_price(&pos.symbol).await else {
            return; // no usable price this tick
        };

        let pnl_pct = pos.pnl_pct(price);
        let reason = exit_decision(pnl_pct, pos.held_seconds(now), &self.config.exits);

        if let Some(reason) = reason {
            self.execute_exit(reason, Some(pnl_pct)).await;
        }
    }

    /// Close the open position with an opposing market order.
    ///
    /// `trigger_pnl_pct` is the monitor's observation at trigger time; the
    /// realized PnL is computed from it so a TP close never books below the
    /// target. Flatten passes None and realizes against the fill price.
    async fn execute_exit(&mut self, reason: ExitReason, trigger_pnl_pct: Option<f64>) -> bool {
        let Some(pos) = self.position.clone() else {
            self.invariant_violation("exit requested with no open position");
            return false;
        };

        let adapter = self.current_adapter();
        let order_side = pos.side.exit_order_side();
        let timeout = Duration::from_millis(self.config.exits.entry_fill_timeout_ms);

        let result = tokio::time::timeout(
            timeout,
            adapter.market_order(&pos.symbol, order_side, pos.quantity),
        )
        .await;

        let fill = match result {
            Ok(Ok(fill)) if fill.is_filled() => {
                self.adapter_ok = true;
                fill
            }
            Ok(Err(ExecutionError::Rejected(msg))) => {
                // Venue said no: stop trading and try to get flat.
                error!("Exit: venue rejected {}: {msg}", pos.symbol);
                self.sink
                    .log(LogLevel::Error, format!("Exit rejected: {msg}"));
                self.set_error(format!("exit rejected: {msg}"));
                if let Err(e) = adapter.close_all().await {
                    error!("Exit: flatten after rejection failed: {e}");
                }
                return false;
            }
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                // Transient: leave the position for the next tick.
                self.adapter_ok = false;
                self.exit_failures += 1;
                warn!(
                    "Exit: attempt {}/{} failed for {}",
                    self.exit_failures, MAX_EXIT_FAILURES, pos.symbol
                );
                if self.exit_failures >= MAX_EXIT_FAILURES {
                    self.set_error("repeated exit failures".to_string());
                    self.alerts.on_error("repeated exit failures").await;
                }
                return false;
            }
        };

        let now = Utc::now();
        let exit_price = fill.avg_price;
        let pnl_pct = trigger_pnl_pct.unwrap_or_else(|| pos.pnl_pct(exit_price));
        let pnl = pos.entry_price * pos.quantity * pnl_pct;
        let fees = pnl.abs() * self.config.exits.taker_fee_factor;

        let mut record = TradeRecord::open(&pos, self.open_slippage_est_pct);
        record.close(exit_price, pnl, pnl_pct, fees, reason, now);

        info!(
            "Exit: {} {} {} pnl={:.4} ({:.3}%) after {}s",
            reason.as_str(),
            pos.side.as_str(),
            pos.symbol,
            pnl,
            pnl_pct * 100.0,
            record.duration_s
        );

        self.position = None;
        self.exit_failures = 0;
        self.latency
            .record("exit_order", Duration::from_millis(fill.latency_ms));

        self.sink.trade_closed(record).await;
        self.governor.on_trade_closed(pnl);
        self.publish_metrics(now);
        self.alerts
            .on_trade(&format!(
                "{} {} {} pnl {:.2} USDT",
                reason.as_str(),
                pos.side.as_str(),
                pos.symbol,
                pnl
            ))
            .await;

        true
    }

    // ------------------------------------------------------------------
    // Control path
    // ------------------------------------------------------------------

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Pause => match self.state {
                BotState::Running => self.transition(BotState::PausedManual, "operator pause"),
                BotState::PausedManual => info!("Control: already paused"),
                other => warn!("Control: pause ignored in {}", other.as_str()),
            },
            Command::Resume => match self.state {
                BotState::PausedManual => self.transition(BotState::Running, "operator resume"),
                BotState::PausedRiskLimit => {
                    let msg =
                        "resume rejected: risk pause lifts on cooldown expiry or day rollover";
                    warn!("Control: {msg}");
                    self.sink.log(LogLevel::Warn, msg);
                }
                BotState::Running => info!("Control: already running"),
                other => warn!("Control: resume ignored in {}", other.as_str()),
            },
            Command::Flatten => {
                info!("Control: flatten");
                if self.position.is_some() {
                    self.execute_exit(ExitReason::Flatten, None).await;
                }
                self.transition(BotState::PausedManual, "operator flatten");
            }
            Command::SetMode(mode) => {
                if mode == self.mode {
                    return;
                }
                if mode == TradingMode::Live && self.live.is_none() {
                    error!("Control: cannot switch to live, no live adapter configured");
                    return;
                }
                warn!(
                    "Control: mode change {} -> {} (takes effect on next entry)",
                    self.mode.as_str(),
                    mode.as_str()
                );
                self.mode = mode;
            }
        }
    }

    async fn on_heartbeat(&mut self) {
        let now = Utc::now();
        self.refresh_risk_state(now).await;

        let status = HealthStatus {
            state: self.state,
            feed_connected: self.cache.is_connected(),
            adapter_reachable: self.adapter_ok,
            sink_healthy: self.sink.is_healthy(),
            last_error: self.last_error.clone(),
            timestamp: now,
        };
        self.sink.health(status);
        self.publish_metrics(now);
        self.latency.log_summary();
    }

    async fn on_feed_unavailable(&mut self) {
        // The feed gave up reconnecting. No new entries, but the open
        // position stays monitored for as long as prices are cached.
        error!("Engine: feed unavailable, no further entries");
        self.set_error("feed unavailable".to_string());
        self.alerts.on_error("market feed unavailable").await;
    }

    async fn shutdown(&mut self) {
        info!("Engine: shutting down");
        if self.position.is_some() {
            let flatten = tokio::time::timeout(
                Duration::from_secs(FLATTEN_BUDGET_SECS),
                self.execute_exit(ExitReason::Flatten, None),
            );
            match flatten.await {
                Ok(true) => info!("Engine: flattened on shutdown"),
                Ok(false) => error!("Engine: shutdown flatten failed, position may remain"),
                Err(_) => error!("Engine: shutdown flatten timed out, position may remain"),
            }
        }
        self.transition(BotState::Shutdown, "termination signal");
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// Day rollover and timed risk-pause expiry. Both are the only ways out
    /// of PAUSED_RISK_LIMIT.
    async fn refresh_risk_state(&mut self, now: DateTime<Utc>) {
        if self.governor.needs_rollover(now) {
            let equity = match self.current_adapter().get_equity().await {
                Ok(e) => e,
                Err(_) => self.governor.equity_baseline(),
            };
            self.governor.maybe_rollover(now, equity);
            if self.state == BotState::PausedRiskLimit {
                self.transition(BotState::Running, "day rollover");
            }
        } else if self.state == BotState::PausedRiskLimit && self.governor.pause_expired(now) {
            self.governor.clear_pause();
            self.transition(BotState::Running, "risk pause expired");
        }
    }

    fn transition(&mut self, next: BotState, reason: &str) {
        if self.state == next {
            return;
        }
        info!("State: {} -> {} ({reason})", self.state.as_str(), next.as_str());
        self.state = next;
        self.sink.state(next, reason);
        self.sink.health(HealthStatus {
            state: next,
            feed_connected: self.cache.is_connected(),
            adapter_reachable: self.adapter_ok,
            sink_healthy: self.sink.is_healthy(),
            last_error: self.last_error.clone(),
            timestamp: Utc::now(),
        });
    }

    fn set_error(&mut self, reason: String) {
        self.last_error = Some(reason.clone());
        self.transition(BotState::Error, &reason);
    }

    fn invariant_violation(&mut self, what: &str) {
        error!("INVARIANT VIOLATION: {what}");
        self.sink
            .log(LogLevel::Error, format!("Invariant violation: {what}"));
        self.set_error(format!("invariant violation: {what}"));
    }

    fn publish_metrics(&self, now: DateTime<Utc>) {
        let day = self.governor.day();
        let pnl_today = day.pnl_today.to_string().parse::<f64>().unwrap_or(0.0);
        self.sink.metrics(MetricsSnapshot {
            equity: self.governor.equity_baseline() + pnl_today,
            pnl_today,
            trade_count_today: day.trade_count_today,
            win_count: day.realized_wins,
            loss_count: day.realized_losses,
            consecutive_losses: day.consecutive_losses,
            open_symbol: self.position.as_ref().map(|p| p.symbol.clone()),
            bot_state: self.state,
            timestamp: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExitConfig;

    fn exits() -> ExitConfig {
        ExitConfig {
            tp_pct: 0.0035,
            sl_pct: 0.0045,
            time_stop_seconds: 150,
            ..ExitConfig::default()
        }
    }

    #[test]
    fn test_exit_band_holds() {
        assert_eq!(exit_decision(0.001, 10, &exits()), None);
        assert_eq!(exit_decision(-0.002, 10, &exits()), None);
    }

    #[test]
    fn test_take_profit_first() {
        assert_eq!(
            exit_decision(0.0035, 10, &exits()),
            Some(ExitReason::TakeProfit)
        );
        // TP wins even when the position is also past the time stop.
        assert_eq!(
            exit_decision(0.004, 500, &exits()),
            Some(ExitReason::TakeProfit)
        );
    }

    #[test]
    fn test_stop_loss_beats_time_stop() {
        assert_eq!(
            exit_decision(-0.0045, 10, &exits()),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(
            exit_decision(-0.005, 500, &exits()),
            Some(ExitReason::StopLoss)
        );
    }

    #[test]
    fn test_time_stop_inside_band() {
        assert_eq!(exit_decision(0.001, 149, &exits()), None);
        assert_eq!(
            exit_decision(0.001, 150, &exits()),
            Some(ExitReason::TimeStop)
        );
        assert_eq!(
            exit_decision(-0.001, 151, &exits()),
            Some(ExitReason::TimeStop)
        );
    }
}
