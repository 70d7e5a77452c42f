//! Tick producers and the control-store poller.
//!
//! These tasks only post messages into the engine mailbox; every piece of
//! mutable strategy state stays inside the engine task.

use std::time::Duration;

use sqlx::{PgPool, Row};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::models::event::{Command, Event};

/// Position-monitor cadence.
pub const MONITOR_TICK_MS: u64 = 100;
/// Heartbeat and control-poll cadence.
pub const HEARTBEAT_SECS: u64 = 5;

/// Spawn the monitor and heartbeat tick sources. Ticks are best-effort:
/// when the engine is mid-await on an exchange call the queue absorbs what
/// it can and redundant ticks are dropped.
pub fn spawn_tick_producers(mailbox: mpsc::Sender<Event>, shutdown: &broadcast::Sender<()>) {
    {
        let mailbox = mailbox.clone();
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(MONITOR_TICK_MS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let _ = mailbox.try_send(Event::MonitorTick);
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    {
        let mut shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let _ = mailbox.try_send(Event::HeartbeatTick);
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

/// Poll the control store every 5 s for operator commands.
///
/// A command is a write of the `pending_command` column on the newest
/// configs row; consuming it clears the column so each command fires once.
pub fn spawn_control_poller(
    pool: PgPool,
    mailbox: mpsc::Sender<Event>,
    shutdown: &broadcast::Sender<()>,
) {
    let mut shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
        info!("Control: poller started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match poll_once(&pool).await {
                        Ok(Some(cmd)) => {
                            info!("Control: received {cmd:?}");
                            if mailbox.send(Event::Command(cmd)).await.is_err() {
                                return; // engine gone
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Control: poll failed: {e}"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}

async fn poll_once(pool: &PgPool) -> anyhow::Result<Option<Command>> {
    let row = sqlx::query(
        "SELECT id, pending_command FROM configs ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: i64 = row.try_get("id")?;
    let pending: Option<String> = row.try_get("pending_command")?;
    let Some(raw) = pending else {
        return Ok(None);
    };

    // Consume the command before acting so a crash cannot replay it.
    sqlx::query("UPDATE configs SET pending_command = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    match Command::parse(&raw) {
        Some(cmd) => Ok(Some(cmd)),
        None => {
            debug!("Control: unrecognized command {raw:?}");
            Ok(None)
        }
    }
}
