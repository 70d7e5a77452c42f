pub mod writer;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::models::event::BotState;
use crate::models::position::TradeRecord;
use crate::models::record::{HealthStatus, LogRecord, LogLevel, MarketEventRecord, MetricsSnapshot};
use crate::sink::writer::PgWriter;

/// Everything the sink persists.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    MarketEvent(MarketEventRecord),
    TradeOpened(TradeRecord),
    TradeClosed(TradeRecord),
    Log(LogRecord),
    Metrics(MetricsSnapshot),
    State {
        state: BotState,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    Health(HealthStatus),
    /// Serialized config; the backend assigns the monotonic version.
    Config { payload: String },
}

/// Cheap handle posting into the sink queue.
///
/// Logs, metrics, state and health records are best-effort: on a full queue
/// they are dropped and counted. Trade records and market events await queue
/// acceptance so they are never lost, which is the only place the trading
/// path may briefly backpressure.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkEvent>,
    healthy: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl SinkHandle {
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn post_best_effort(&self, event: SinkEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.post_best_effort(SinkEvent::Log(LogRecord::new(level, message)));
    }

    pub fn metrics(&self, snapshot: MetricsSnapshot) {
        self.post_best_effort(SinkEvent::Metrics(snapshot));
    }

    pub fn state(&self, state: BotState, reason: impl Into<String>) {
        self.post_best_effort(SinkEvent::State {
            state,
            reason: reason.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn health(&self, status: HealthStatus) {
        self.post_best_effort(SinkEvent::Health(status));
    }

    pub fn config(&self, payload: String) {
        self.post_best_effort(SinkEvent::Config { payload });
    }

    pub async fn market_event(&self, record: MarketEventRecord) {
        if self.tx.send(SinkEvent::MarketEvent(record)).await.is_err() {
            error!("Sink: queue closed, market event lost");
        }
    }

    pub async fn trade_opened(&self, record: TradeRecord) {
        if self.tx.send(SinkEvent::TradeOpened(record)).await.is_err() {
            error!("Sink: queue closed, trade record lost");
        }
    }

    pub async fn trade_closed(&self, record: TradeRecord) {
        if self.tx.send(SinkEvent::TradeClosed(record)).await.is_err() {
            error!("Sink: queue closed, trade record lost");
        }
    }
}

/// Spawn a Postgres-backed sink. Bootstraps the schema, then consumes the
/// queue until every handle is dropped. Write failures mark the sink
/// unhealthy but never stop the consumer. The pool is returned so the
/// control plane can poll the same store.
pub async fn spawn_postgres(
    url: &str,
    capacity: usize,
) -> anyhow::Result<(SinkHandle, sqlx::PgPool)> {
    let writer = PgWriter::connect(url).await?;
    let pool = writer.pool().clone();
    let (tx, mut rx) = mpsc::channel::<SinkEvent>(capacity);
    let healthy = Arc::new(AtomicBool::new(true));
    let dropped = Arc::new(AtomicU64::new(0));

    let task_healthy = healthy.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match writer.write(&event).await {
                Ok(()) => {
                    task_healthy.store(true, Ordering::Relaxed);
                }
                Err(e) => {
                    task_healthy.store(false, Ordering::Relaxed);
                    error!("Sink: write failed: {e}");
                }
            }
        }
        info!("Sink: queue drained, writer stopping");
    });

    Ok((
        SinkHandle {
            tx,
            healthy,
            dropped,
        },
        pool,
    ))
}

/// In-memory sink for tests and database-less dry runs. Returns the shared
/// store so callers can inspect what was recorded.
pub fn spawn_memory(capacity: usize) -> (SinkHandle, Arc<Mutex<Vec<SinkEvent>>>) {
    let (tx, mut rx) = mpsc::channel::<SinkEvent>(capacity);
    let healthy = Arc::new(AtomicBool::new(true));
    let dropped = Arc::new(AtomicU64::new(0));
    let store: Arc<Mutex<Vec<SinkEvent>>> = Arc::new(Mutex::new(Vec::new()));

    let task_store = store.clone();
    tokio::spawn(async move {
        let mut config_version: i64 = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, SinkEvent::Config { .. }) {
                config_version += 1;
                info!("Sink(memory): config v{config_version} recorded");
            }
            task_store.lock().await.push(event);
        }
    });

    (
        SinkHandle {
            tx,
            healthy,
            dropped,
        },
        store,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records() {
        let (sink, store) = spawn_memory(64);
        sink.log(LogLevel::Info, "hello");
        sink.state(BotState::Running, "boot complete");

        // Give the consumer task a turn.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let events = store.lock().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SinkEvent::Log(_)));
        assert!(matches!(events[1], SinkEvent::State { .. }));
    }

    #[tokio::test]
    async fn test_overflow_drops_and_counts() {
        // Tiny queue with no consumer: fill it, then overflow.
        let (tx, _rx) = mpsc::channel::<SinkEvent>(2);
        let sink = SinkHandle {
            tx,
            healthy: Arc::new(AtomicBool::new(true)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        for _ in 0..5 {
            sink.log(LogLevel::Info, "x");
        }
        assert_eq!(sink.dropped_count(), 3);
    }
}
