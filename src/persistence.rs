// =============================================================================
// Persistence — SQLite store and the non-blocking write journal
// =============================================================================
//
// The relational store is the durable record: trades, snapshots, signals,
// events, analyst weights, breaker state, and historical rollups. WAL mode
// keeps readers cheap during writes.
//
// The decision path never waits on the disk: writes are submitted to the
// `Journal`, a bounded in-memory queue drained by a background task. When
// the queue is full the oldest entry is dropped and a warning event is
// emitted. Event durability is best-effort; decision-path liveness is not.
// =============================================================================

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::analysts::Signal;
use crate::events::{Event, EventBus};
use crate::fusion::AnalystWeight;
use crate::ledger::{Portfolio, Position};
use crate::regime::{Regime, RegimeReading};
use crate::sentinel::BreakerState;
use crate::types::Pair;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL UNIQUE,
    pair TEXT NOT NULL,
    action TEXT NOT NULL,
    requested_size REAL NOT NULL,
    filled_base REAL NOT NULL DEFAULT 0,
    filled_quote REAL NOT NULL DEFAULT 0,
    average_price REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    fees REAL NOT NULL DEFAULT 0,
    realized_pnl REAL,
    entry_price REAL,
    exit_price REAL,
    execution_strategy TEXT NOT NULL,
    decision_ts INTEGER NOT NULL,
    submitted_ts INTEGER,
    filled_ts INTEGER,
    latency_ms INTEGER,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_trades_pair ON trades(pair, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);

CREATE TABLE IF NOT EXISTS portfolio_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    available_quote REAL NOT NULL,
    total_value REAL NOT NULL,
    positions_json TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id INTEGER,
    cycle_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    pair TEXT NOT NULL,
    direction REAL NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL,
    regime TEXT,
    anomaly_score REAL,
    metadata_json TEXT,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_signals_cycle ON signals(cycle_id);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    source TEXT NOT NULL,
    data_json TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_events_type ON events(type, created_at DESC);

-- regime '' is the default row; SQLite treats NULLs as distinct in UNIQUE
-- constraints, so the default is normalized to the empty string.
CREATE TABLE IF NOT EXISTS analyst_weights (
    analyst_name TEXT NOT NULL,
    regime TEXT NOT NULL DEFAULT '',
    weight REAL NOT NULL,
    accuracy_30d REAL NOT NULL,
    sample_count INTEGER NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    UNIQUE(analyst_name, regime)
);

CREATE TABLE IF NOT EXISTS breaker_state (
    name TEXT PRIMARY KEY,
    tripped INTEGER NOT NULL,
    tripped_at INTEGER,
    value REAL NOT NULL,
    threshold REAL NOT NULL,
    cooldown_until INTEGER
);

CREATE TABLE IF NOT EXISTS regime_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair TEXT NOT NULL,
    regime TEXT NOT NULL,
    confidence REAL NOT NULL,
    adx REAL NOT NULL,
    atr_pct REAL NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS anomaly_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pair TEXT NOT NULL,
    score REAL NOT NULL,
    threshold REAL NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS execution_quality (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL,
    pair TEXT NOT NULL,
    strategy TEXT NOT NULL,
    slippage_bps REAL,
    latency_ms INTEGER,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
"#;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of the `trades` table.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub order_id: String,
    pub pair: String,
    pub action: String,
    pub requested_size: f64,
    pub filled_base: f64,
    pub filled_quote: f64,
    pub average_price: f64,
    pub status: String,
    pub fees: f64,
    pub realized_pnl: Option<f64>,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub execution_strategy: String,
    pub decision_ts: i64,
    pub submitted_ts: Option<i64>,
    pub filled_ts: Option<i64>,
    pub latency_ms: Option<i64>,
}

/// An order persisted as still open, needing reconciliation after restart.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub order_id: String,
    pub pair: Pair,
    pub action: String,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Synchronous SQLite store. All methods are cheap; the async side goes
/// through [`Journal`].
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialise database schema")?;
        info!(path = %path.display(), "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialise database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    /// Insert or update a trade row, keyed by the unique order id.
    pub fn save_trade(&self, trade: &TradeRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (order_id, pair, action, requested_size, filled_base,
                filled_quote, average_price, status, fees, realized_pnl, entry_price,
                exit_price, execution_strategy, decision_ts, submitted_ts, filled_ts, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(order_id) DO UPDATE SET
                filled_base = excluded.filled_base,
                filled_quote = excluded.filled_quote,
                average_price = excluded.average_price,
                status = excluded.status,
                fees = excluded.fees,
                realized_pnl = excluded.realized_pnl,
                exit_price = excluded.exit_price,
                filled_ts = excluded.filled_ts,
                latency_ms = excluded.latency_ms",
            params![
                trade.order_id,
                trade.pair,
                trade.action,
                trade.requested_size,
                trade.filled_base,
                trade.filled_quote,
                trade.average_price,
                trade.status,
                trade.fees,
                trade.realized_pnl,
                trade.entry_price,
                trade.exit_price,
                trade.execution_strategy,
                trade.decision_ts,
                trade.submitted_ts,
                trade.filled_ts,
                trade.latency_ms,
            ],
        )
        .context("failed to save trade")?;
        Ok(())
    }

    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT order_id, pair, action, requested_size, filled_base, filled_quote,
                    average_price, status, fees, realized_pnl, entry_price, exit_price,
                    execution_strategy, decision_ts, submitted_ts, filled_ts, latency_ms
             FROM trades ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(TradeRecord {
                    order_id: row.get(0)?,
                    pair: row.get(1)?,
                    action: row.get(2)?,
                    requested_size: row.get(3)?,
                    filled_base: row.get(4)?,
                    filled_quote: row.get(5)?,
                    average_price: row.get(6)?,
                    status: row.get(7)?,
                    fees: row.get(8)?,
                    realized_pnl: row.get(9)?,
                    entry_price: row.get(10)?,
                    exit_price: row.get(11)?,
                    execution_strategy: row.get(12)?,
                    decision_ts: row.get(13)?,
                    submitted_ts: row.get(14)?,
                    filled_ts: row.get(15)?,
                    latency_ms: row.get(16)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Orders persisted as PENDING or PARTIAL — the restart reconciler
    /// queries the exchange for each of these before the scheduler starts.
    pub fn pending_orders(&self) -> Result<Vec<PendingOrder>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT order_id, pair, action FROM trades
             WHERE status IN ('PENDING', 'PARTIAL') ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(order_id, pair, action)| {
                Pair::parse(&pair).map(|pair| PendingOrder {
                    order_id,
                    pair,
                    action,
                })
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn save_snapshot(&self, snapshot: &Portfolio) -> Result<()> {
        let positions_json = serde_json::to_string(&snapshot.positions)
            .context("failed to serialize positions")?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO portfolio_snapshots (available_quote, total_value, positions_json)
             VALUES (?1, ?2, ?3)",
            params![snapshot.available_quote, snapshot.total_value, positions_json],
        )
        .context("failed to save snapshot")?;
        Ok(())
    }

    /// Positions from the most recent snapshot, for startup restoration.
    pub fn load_positions_on_startup(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock();
        let result: Option<String> = conn
            .query_row(
                "SELECT positions_json FROM portfolio_snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .ok();

        let Some(json) = result else {
            return Ok(Vec::new());
        };
        let positions: std::collections::HashMap<String, Position> =
            serde_json::from_str(&json).context("failed to parse persisted positions")?;
        Ok(positions.into_values().collect())
    }

    // -------------------------------------------------------------------------
    // Signals & events
    // -------------------------------------------------------------------------

    pub fn save_signal(
        &self,
        cycle_id: u64,
        signal: &Signal,
        regime: Option<Regime>,
        anomaly_score: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signals (cycle_id, source, pair, direction, confidence, reasoning,
                regime, anomaly_score, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                cycle_id as i64,
                signal.source,
                signal.pair.to_string(),
                signal.direction,
                signal.confidence,
                signal.reasoning,
                regime.map(|r| r.as_str()),
                anomaly_score,
                serde_json::to_string(&signal.metadata).ok(),
            ],
        )
        .context("failed to save signal")?;
        Ok(())
    }

    pub fn save_event(&self, kind: &str, source: &str, data_json: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (type, source, data_json) VALUES (?1, ?2, ?3)",
            params![kind, source, data_json],
        )
        .context("failed to save event")?;
        Ok(())
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT type, data_json FROM events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Analyst weights
    // -------------------------------------------------------------------------

    pub fn upsert_weight(&self, weight: &AnalystWeight) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO analyst_weights (analyst_name, regime, weight, accuracy_30d, sample_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(analyst_name, regime) DO UPDATE SET
                weight = excluded.weight,
                accuracy_30d = excluded.accuracy_30d,
                sample_count = excluded.sample_count,
                updated_at = strftime('%s', 'now')",
            params![
                weight.analyst,
                weight.regime.map(|r| r.as_str()).unwrap_or(""),
                weight.weight,
                weight.rolling_accuracy_30d,
                weight.sample_count as i64,
            ],
        )
        .context("failed to upsert analyst weight")?;
        Ok(())
    }

    pub fn load_weights(&self) -> Result<Vec<AnalystWeight>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT analyst_name, regime, weight, accuracy_30d, sample_count FROM analyst_weights",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(analyst, regime, weight, accuracy, samples)| AnalystWeight {
                analyst,
                regime: Regime::from_str_opt(&regime),
                weight,
                rolling_accuracy_30d: accuracy,
                sample_count: samples as u64,
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Breaker state
    // -------------------------------------------------------------------------

    pub fn save_breaker_states(&self, states: &[BreakerState]) -> Result<()> {
        let conn = self.conn.lock();
        for state in states {
            conn.execute(
                "INSERT INTO breaker_state (name, tripped, tripped_at, value, threshold, cooldown_until)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    tripped = excluded.tripped,
                    tripped_at = excluded.tripped_at,
                    value = excluded.value,
                    threshold = excluded.threshold,
                    cooldown_until = excluded.cooldown_until",
                params![
                    state.name,
                    state.tripped as i64,
                    state.tripped_at.map(|t| t.timestamp()),
                    state.value,
                    state.threshold,
                    state.cooldown_until.map(|t| t.timestamp()),
                ],
            )
            .context("failed to save breaker state")?;
        }
        Ok(())
    }

    pub fn load_breaker_states(&self) -> Result<Vec<BreakerState>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, tripped, tripped_at, value, threshold, cooldown_until FROM breaker_state",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BreakerState {
                    name: row.get(0)?,
                    tripped: row.get::<_, i64>(1)? != 0,
                    tripped_at: row
                        .get::<_, Option<i64>>(2)?
                        .and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
                    value: row.get(3)?,
                    threshold: row.get(4)?,
                    cooldown_until: row
                        .get::<_, Option<i64>>(5)?
                        .and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Rollups
    // -------------------------------------------------------------------------

    pub fn save_regime_snapshot(&self, pair: &Pair, reading: &RegimeReading) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO regime_snapshots (pair, regime, confidence, adx, atr_pct)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pair.to_string(),
                reading.regime.as_str(),
                reading.confidence,
                reading.adx,
                reading.atr_pct,
            ],
        )
        .context("failed to save regime snapshot")?;
        Ok(())
    }

    pub fn save_anomaly_event(&self, pair: &Pair, score: f64, threshold: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO anomaly_events (pair, score, threshold) VALUES (?1, ?2, ?3)",
            params![pair.to_string(), score, threshold],
        )
        .context("failed to save anomaly event")?;
        Ok(())
    }

    pub fn save_execution_quality(
        &self,
        order_id: &str,
        pair: &Pair,
        strategy: &str,
        slippage_bps: Option<f64>,
        latency_ms: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO execution_quality (order_id, pair, strategy, slippage_bps, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![order_id, pair.to_string(), strategy, slippage_bps, latency_ms],
        )
        .context("failed to save execution quality")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Journal — bounded non-blocking write path
// ---------------------------------------------------------------------------

/// A write destined for the store.
#[derive(Debug)]
pub enum WriteOp {
    Trade(TradeRecord),
    Snapshot(Portfolio),
    Signal {
        cycle_id: u64,
        signal: Signal,
        regime: Option<Regime>,
        anomaly_score: Option<f64>,
    },
    Event {
        kind: String,
        source: String,
        data_json: String,
    },
    Breakers(Vec<BreakerState>),
    Weight(AnalystWeight),
    RegimeSnapshot {
        pair: Pair,
        reading: RegimeReading,
    },
    Anomaly {
        pair: Pair,
        score: f64,
        threshold: f64,
    },
    ExecutionQuality {
        order_id: String,
        pair: Pair,
        strategy: String,
        slippage_bps: Option<f64>,
        latency_ms: Option<i64>,
    },
}

struct JournalQueue {
    ops: Mutex<VecDeque<WriteOp>>,
    notify: Notify,
    capacity: usize,
}

/// Handle for submitting writes. Cloneable; submission never blocks.
#[derive(Clone)]
pub struct Journal {
    queue: Arc<JournalQueue>,
    dropped: Arc<AtomicU64>,
    events: EventBus,
}

impl Journal {
    /// Spawn the drain task and return the submission handle.
    pub fn spawn(store: Arc<Store>, capacity: usize, events: EventBus) -> Self {
        let queue = Arc::new(JournalQueue {
            ops: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        });

        let journal = Self {
            queue: queue.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
            events,
        };

        tokio::spawn(async move {
            loop {
                queue.notify.notified().await;
                loop {
                    let batch: Vec<WriteOp> = {
                        let mut ops = queue.ops.lock();
                        ops.drain(..).collect()
                    };
                    if batch.is_empty() {
                        break;
                    }
                    let store = store.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        for op in batch {
                            if let Err(e) = apply_op(&store, op) {
                                warn!(error = %e, "journal write failed");
                            }
                        }
                    })
                    .await;
                    if result.is_err() {
                        warn!("journal drain task panicked");
                    }
                }
            }
        });

        journal
    }

    /// Submit a write. When the queue is full the oldest entry is dropped
    /// with a warning event; the caller is never blocked.
    pub fn submit(&self, op: WriteOp) {
        {
            let mut ops = self.queue.ops.lock();
            if ops.len() >= self.queue.capacity {
                ops.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(dropped, "journal queue full — oldest write dropped");
                self.events.publish(Event::Warning {
                    source: "journal".to_string(),
                    message: format!("write queue full, {dropped} writes dropped so far"),
                });
            }
            ops.push_back(op);
        }
        self.queue.notify.notify_one();
    }

    pub fn dropped_writes(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Wait until the queue drains (shutdown flush).
    pub async fn flush(&self) {
        loop {
            if self.queue.ops.lock().is_empty() {
                return;
            }
            self.queue.notify.notify_one();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.ops.lock().len()
    }
}

fn apply_op(store: &Store, op: WriteOp) -> Result<()> {
    match op {
        WriteOp::Trade(trade) => store.save_trade(&trade),
        WriteOp::Snapshot(snapshot) => store.save_snapshot(&snapshot),
        WriteOp::Signal {
            cycle_id,
            signal,
            regime,
            anomaly_score,
        } => store.save_signal(cycle_id, &signal, regime, anomaly_score),
        WriteOp::Event {
            kind,
            source,
            data_json,
        } => store.save_event(&kind, &source, &data_json),
        WriteOp::Breakers(states) => store.save_breaker_states(&states),
        WriteOp::Weight(weight) => store.upsert_weight(&weight),
        WriteOp::RegimeSnapshot { pair, reading } => store.save_regime_snapshot(&pair, &reading),
        WriteOp::Anomaly {
            pair,
            score,
            threshold,
        } => store.save_anomaly_event(&pair, score, threshold),
        WriteOp::ExecutionQuality {
            order_id,
            pair,
            strategy,
            slippage_bps,
            latency_ms,
        } => store.save_execution_quality(
            &order_id,
            &pair,
            &strategy,
            slippage_bps,
            latency_ms,
        ),
    }
}

/// Subscribe to the bus and journal every event. Event consumers are
/// idempotent, so at-least-once delivery into the store is fine.
pub fn spawn_event_persister(journal: Journal, bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data_json = serde_json::to_string(&event).unwrap_or_default();
                    journal.submit(WriteOp::Event {
                        kind: event.kind().to_string(),
                        source: "core".to_string(),
                        data_json,
                    });
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "event persister lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Build a trade row from execution output.
#[allow(clippy::too_many_arguments)]
pub fn trade_record(
    order_id: &str,
    pair: &Pair,
    action: &str,
    requested_size: f64,
    result: &crate::exchange::OrderResult,
    execution_strategy: &str,
    entry_price: Option<f64>,
    realized_pnl: Option<f64>,
    decision_ts: i64,
) -> TradeRecord {
    let now = Utc::now().timestamp_millis();
    TradeRecord {
        order_id: order_id.to_string(),
        pair: pair.to_string(),
        action: action.to_string(),
        requested_size,
        filled_base: result.filled_base,
        filled_quote: result.filled_quote,
        average_price: result.average_price,
        status: result.status.to_string(),
        fees: result.fees,
        realized_pnl,
        entry_price,
        exit_price: if realized_pnl.is_some() {
            Some(result.average_price)
        } else {
            None
        },
        execution_strategy: execution_strategy.to_string(),
        decision_ts,
        submitted_ts: Some(decision_ts),
        filled_ts: Some(now),
        latency_ms: Some((now - decision_ts).max(0)),
    }
}
