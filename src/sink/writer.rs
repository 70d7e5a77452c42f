//! Postgres row writer for the event sink.
//!
//! Owns the single conversion from domain records to the persisted table
//! layout; nothing else in the crate builds rows.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::models::position::TradeRecord;
use crate::sink::SinkEvent;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bot_states (
    id BIGSERIAL PRIMARY KEY,
    state TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS metrics (
    id BIGSERIAL PRIMARY KEY,
    equity DOUBLE PRECISION NOT NULL,
    pnl_today DOUBLE PRECISION NOT NULL,
    trade_count_today INTEGER NOT NULL,
    win_count INTEGER NOT NULL,
    loss_count INTEGER NOT NULL,
    consecutive_losses INTEGER NOT NULL,
    open_symbol TEXT,
    bot_state TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS trades (
    id BIGINT PRIMARY KEY,
    setup_id BIGINT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    entry_price DOUBLE PRECISION NOT NULL,
    exit_price DOUBLE PRECISION,
    quantity DOUBLE PRECISION NOT NULL,
    pnl_usdt DOUBLE PRECISION NOT NULL DEFAULT 0,
    pnl_pct DOUBLE PRECISION NOT NULL DEFAULT 0,
    duration_s BIGINT NOT NULL DEFAULT 0,
    fees DOUBLE PRECISION NOT NULL DEFAULT 0,
    slippage_est_pct DOUBLE PRECISION NOT NULL DEFAULT 0,
    exit_reason TEXT,
    entry_ts TIMESTAMPTZ NOT NULL,
    exit_ts TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS market_events (
    id BIGSERIAL PRIMARY KEY,
    setup_id BIGINT NOT NULL,
    symbol TEXT NOT NULL,
    liq_side TEXT NOT NULL,
    liq_price DOUBLE PRECISION NOT NULL,
    liq_quantity DOUBLE PRECISION NOT NULL,
    liq_notional DOUBLE PRECISION NOT NULL,
    liq_size_ok BOOLEAN NOT NULL,
    volume_ok BOOLEAN NOT NULL,
    spread_ok BOOLEAN NOT NULL,
    momentum_ok BOOLEAN NOT NULL,
    exhaustion_ok BOOLEAN NOT NULL,
    volume_mult_value DOUBLE PRECISION NOT NULL,
    spread_bps_value DOUBLE PRECISION NOT NULL,
    price_delta_value DOUBLE PRECISION NOT NULL,
    exhaustion_value INTEGER NOT NULL,
    risk_admitted BOOLEAN NOT NULL,
    passed BOOLEAN NOT NULL,
    rejection_reason TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS log_entries (
    id BIGSERIAL PRIMARY KEY,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS configs (
    id BIGSERIAL PRIMARY KEY,
    version BIGINT NOT NULL,
    payload TEXT NOT NULL,
    pending_command TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS health_checks (
    id BIGSERIAL PRIMARY KEY,
    state TEXT NOT NULL,
    feed_connected BOOLEAN NOT NULL,
    adapter_reachable BOOLEAN NOT NULL,
    sink_healthy BOOLEAN NOT NULL,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
"#;

pub struct PgWriter {
    pool: PgPool,
}

impl PgWriter {
    /// Connect and bootstrap the schema so a fresh database works first run.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await?;

        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&pool).await?;
            }
        }
        info!("Sink: schema ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn write(&self, event: &SinkEvent) -> anyhow::Result<()> {
        match event {
            SinkEvent::MarketEvent(rec) => {
                sqlx::query(
                    r#"
                    INSERT INTO market_events
                        (setup_id, symbol, liq_side, liq_price, liq_quantity, liq_notional,
                         liq_size_ok, volume_ok, spread_ok, momentum_ok, exhaustion_ok,
                         volume_mult_value, spread_bps_value, price_delta_value, exhaustion_value,
                         risk_admitted, passed, rejection_reason, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                            $11, $12, $13, $14, $15, $16, $17, $18, $19)
                    "#,
                )
                .bind(rec.setup_id)
                .bind(&rec.symbol)
                .bind(rec.liq_side.as_str())
                .bind(rec.liq_price)
                .bind(rec.liq_quantity)
                .bind(rec.liq_notional)
                .bind(rec.liq_size_ok)
                .bind(rec.volume_ok)
                .bind(rec.spread_ok)
                .bind(rec.momentum_ok)
                .bind(rec.exhaustion_ok)
                .bind(rec.volume_mult_value)
                .bind(rec.spread_bps_value)
                .bind(rec.price_delta_value)
                .bind(rec.exhaustion_value as i32)
                .bind(rec.risk_admitted)
                .bind(rec.passed)
                .bind(&rec.rejection_reason)
                .bind(rec.timestamp)
                .execute(&self.pool)
                .await?;
            }
            SinkEvent::TradeOpened(rec) => {
                self.insert_trade(rec).await?;
            }
            SinkEvent::TradeClosed(rec) => {
                sqlx::query(
                    r#"
                    UPDATE trades SET
                        exit_price = $2, pnl_usdt = $3, pnl_pct = $4, duration_s = $5,
                        fees = $6, exit_reason = $7, exit_ts = $8
                    WHERE id = $1
                    "#,
                )
                .bind(rec.id)
                .bind(rec.exit_price)
                .bind(rec.pnl_usdt)
                .bind(rec.pnl_pct)
                .bind(rec.duration_s)
                .bind(rec.fees)
                .bind(rec.exit_reason.map(|r| r.as_str()))
                .bind(rec.exit_ts)
                .execute(&self.pool)
                .await?;
            }
            SinkEvent::Log(rec) => {
                sqlx::query(
                    "INSERT INTO log_entries (level, message, created_at) VALUES ($1, $2, $3)",
                )
                .bind(rec.level.as_str())
                .bind(&rec.message)
                .bind(rec.timestamp)
                .execute(&self.pool)
                .await?;
            }
            SinkEvent::Metrics(snap) => {
                sqlx::query(
                    r#"
                    INSERT INTO metrics
                        (equity, pnl_today, trade_count_today, win_count, loss_count,
                         consecutive_losses, open_symbol, bot_state, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(snap.equity)
                .bind(snap.pnl_today)
                .bind(snap.trade_count_today as i32)
                .bind(snap.win_count as i32)
                .bind(snap.loss_count as i32)
                .bind(snap.consecutive_losses as i32)
                .bind(&snap.open_symbol)
                .bind(snap.bot_state.as_str())
                .bind(snap.timestamp)
                .execute(&self.pool)
                .await?;
            }
            SinkEvent::State {
                state,
                reason,
                timestamp,
            } => {
                sqlx::query(
                    "INSERT INTO bot_states (state, reason, created_at) VALUES ($1, $2, $3)",
                )
                .bind(state.as_str())
                .bind(reason)
                .bind(timestamp)
                .execute(&self.pool)
                .await?;
            }
            SinkEvent::Health(status) => {
                sqlx::query(
                    r#"
                    INSERT INTO health_checks
                        (state, feed_connected, adapter_reachable, sink_healthy, last_error, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(status.state.as_str())
                .bind(status.feed_connected)
                .bind(status.adapter_reachable)
                .bind(status.sink_healthy)
                .bind(&status.last_error)
                .bind(status.timestamp)
                .execute(&self.pool)
                .await?;
            }
            SinkEvent::Config { payload } => {
                // Version is assigned here so it is monotonic per store.
                sqlx::query(
                    r#"
                    INSERT INTO configs (version, payload, created_at)
                    VALUES ((SELECT COALESCE(MAX(version), 0) + 1 FROM configs), $1, NOW())
                    "#,
                )
                .bind(payload)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn insert_trade(&self, rec: &TradeRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (id, setup_id, symbol, side, entry_price, exit_price, quantity,
                 pnl_usdt, pnl_pct, duration_s, fees, slippage_est_pct,
                 exit_reason, entry_ts, exit_ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(rec.id)
        .bind(rec.setup_id)
        .bind(&rec.symbol)
        .bind(rec.side.as_str())
        .bind(rec.entry_price)
        .bind(rec.exit_price)
        .bind(rec.quantity)
        .bind(rec.pnl_usdt)
        .bind(rec.pnl_pct)
        .bind(rec.duration_s)
        .bind(rec.fees)
        .bind(rec.slippage_est_pct)
        .bind(rec.exit_reason.map(|r| r.as_str()))
        .bind(rec.entry_ts)
        .bind(rec.exit_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
