// =============================================================================
// Core — the explicit engine handle (init → run → stop)
// =============================================================================
//
// No process-wide singletons: every subsystem hangs off this handle and is
// passed down through constructors. `init` builds and restores state,
// `run` starts the scheduler and the stop-loss monitor, `stop` winds both
// down and flushes.
//
// The command / query / subscribe surface the outer process calls lives
// here: trigger_cycle, pause, resume, emergency_stop, snapshot_portfolio,
// recent_trades, status, performance, breaker_state,
// subscribe_portfolio_updates, reload_partial.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analysts::{analyst_set, FeedStore, Headline};
use crate::config::{Config, ConfigPatch, ExchangeSelector};
use crate::costs::{CostTotals, CostTracker};
use crate::cycle::{CycleDeps, CycleRecord};
use crate::events::{Event, EventBus};
use crate::exchange::{
    ExchangeApi, KrakenClient, MockExchange, OrderStatus, SimulatedExchange,
};
use crate::executor::Executor;
use crate::fanout::Fanout;
use crate::fusion::{FusionEngine, WeightBook};
use crate::ledger::{Ledger, Portfolio};
use crate::market_data::CandleCache;
use crate::persistence::{spawn_event_persister, Journal, Store, TradeRecord, WriteOp};
use crate::regime::RegimeDetector;
use crate::scheduler::{spawn_scheduler, SchedulerHandle, SchedulerStatus};
use crate::sentinel::{run_stop_loss_monitor, BreakerState, Sentinel};
use crate::strategist::Strategist;
use crate::types::Side;

/// Stop-loss monitor poll cadence.
const STOP_LOSS_POLL: Duration = Duration::from_secs(15);

/// Candle retention in the shared cache.
const CANDLE_RETENTION: usize = 500;

/// Aggregate engine status for the outer process.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub scheduler: SchedulerStatus,
    pub uptime_secs: u64,
    pub breakers: Vec<BreakerState>,
    pub costs: CostTotals,
    pub open_positions: usize,
    pub total_value: f64,
}

/// Performance summary since engine start.
#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub initial_capital: f64,
    pub total_value: f64,
    pub return_pct: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_fees: f64,
    pub closed_trades: usize,
    pub win_rate: f64,
}

pub struct Core {
    config: Arc<RwLock<Config>>,
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<Ledger>,
    candles: Arc<CandleCache>,
    fusion: Arc<FusionEngine>,
    regime: Arc<RegimeDetector>,
    strategist: Arc<Strategist>,
    sentinel: Arc<Sentinel>,
    executor: Arc<Executor>,
    events: EventBus,
    store: Arc<Store>,
    journal: Journal,
    fanout: Arc<Fanout>,
    feeds: Arc<FeedStore>,
    costs: Arc<CostTracker>,
    abort: Arc<AtomicBool>,
    cycle_seq: Arc<AtomicU64>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    monitor: Mutex<Option<tokio::task::JoinHandle<()>>>,
    reactive_tx: mpsc::Sender<()>,
    reactive_rx: Mutex<Option<mpsc::Receiver<()>>>,
    start_time: std::time::Instant,
}

impl Core {
    // -------------------------------------------------------------------------
    // init
    // -------------------------------------------------------------------------

    /// Build the engine from a validated configuration and restore persisted
    /// state. Fails fast on configuration or storage errors.
    pub fn init(config: Config) -> Result<Arc<Self>> {
        config.validate().context("configuration invalid")?;
        let exchange = build_exchange(&config);
        Self::init_with_exchange(config, exchange)
    }

    /// As [`init`] with an externally supplied adapter (used by tests to
    /// inject a scripted mock).
    pub fn init_with_exchange(
        config: Config,
        exchange: Arc<dyn ExchangeApi>,
    ) -> Result<Arc<Self>> {
        config.validate().context("configuration invalid")?;

        let events = EventBus::new();

        let store =
            Arc::new(Store::open(&config.persistence.db_path).context("failed to open store")?);
        let journal = Journal::spawn(
            store.clone(),
            config.persistence.queue_capacity,
            events.clone(),
        );
        spawn_event_persister(journal.clone(), &events);

        let ledger = Arc::new(Ledger::new(
            config.initial_capital,
            config.persistence.snapshot_retention,
        ));
        let costs = Arc::new(CostTracker::new(config.strategist.daily_budget_usd));
        let sentinel = Arc::new(Sentinel::new(
            config.risk.clone(),
            &config.breakers,
            config.initial_capital,
            events.clone(),
        ));
        let executor = Arc::new(Executor::new(
            exchange.clone(),
            ledger.clone(),
            events.clone(),
            config.execution.clone(),
        ));
        let fusion = Arc::new(FusionEngine::from_config(&config.fusion));
        let regime = Arc::new(RegimeDetector::new(Duration::from_secs(
            config.cycle_interval_minutes * 60,
        )));
        let strategist = Arc::new(Strategist::new(&config, costs.clone()));
        let fanout = Arc::new(Fanout::new(
            config.fanout.realtime_fanout_enabled,
            config.fanout.slow_consumer_threshold,
        ));

        // ── Restore persisted state ──────────────────────────────────────
        match store.load_breaker_states() {
            Ok(states) if !states.is_empty() => {
                info!(count = states.len(), "breaker state restored");
                sentinel.restore_breakers(states);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to load breaker state"),
        }
        match store.load_weights() {
            Ok(rows) => {
                for row in rows {
                    fusion.upsert_weight(row);
                }
            }
            Err(e) => warn!(error = %e, "failed to load analyst weights"),
        }
        match store.load_positions_on_startup() {
            Ok(positions) if !positions.is_empty() => {
                info!(count = positions.len(), "positions restored from snapshot");
                for position in positions {
                    ledger.restore_position(position);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to load persisted positions"),
        }

        let (reactive_tx, reactive_rx) = mpsc::channel(8);

        info!(
            exchange = ?config.effective_exchange(),
            stage = ?config.stage,
            pairs = ?config.pairs,
            "core initialised"
        );

        Ok(Arc::new(Self {
            config: Arc::new(RwLock::new(config)),
            exchange,
            ledger,
            candles: Arc::new(CandleCache::new(CANDLE_RETENTION)),
            fusion,
            regime,
            strategist,
            sentinel,
            executor,
            events,
            store,
            journal,
            fanout,
            feeds: Arc::new(FeedStore::new()),
            costs,
            abort: Arc::new(AtomicBool::new(false)),
            cycle_seq: Arc::new(AtomicU64::new(0)),
            scheduler: Mutex::new(None),
            monitor: Mutex::new(None),
            reactive_tx,
            reactive_rx: Mutex::new(Some(reactive_rx)),
            start_time: std::time::Instant::now(),
        }))
    }

    // -------------------------------------------------------------------------
    // run / stop
    // -------------------------------------------------------------------------

    /// Reconcile against the exchange, then start the scheduler and the
    /// stop-loss monitor.
    pub async fn run(self: &Arc<Self>) -> SchedulerHandle {
        let interval =
            Duration::from_secs(self.config.read().cycle_interval_minutes * 60);
        self.run_with_interval(interval).await
    }

    /// As [`run`] but with an explicit interval (used by tests).
    pub async fn run_with_interval(self: &Arc<Self>, interval: Duration) -> SchedulerHandle {
        self.reconcile_on_startup().await;

        // A breaker trip nudges the scheduler for a reactive cycle.
        {
            let mut rx = self.events.subscribe();
            let reactive = self.reactive_tx.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(Event::BreakerTripped { .. }) => {
                            let _ = reactive.try_send(());
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        // Stop-loss monitor runs between cycles.
        let monitor = tokio::spawn(run_stop_loss_monitor(
            self.sentinel.clone(),
            self.ledger.clone(),
            self.exchange.clone(),
            self.executor.clone(),
            self.events.clone(),
            self.reactive_tx.clone(),
            STOP_LOSS_POLL,
        ));
        *self.monitor.lock() = Some(monitor);

        let reactive_rx = self
            .reactive_rx
            .lock()
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);

        let stage = self.config.read().stage;
        let deps = Arc::new(CycleDeps {
            config: self.config.clone(),
            exchange: self.exchange.clone(),
            ledger: self.ledger.clone(),
            candles: self.candles.clone(),
            analysts: analyst_set(stage),
            fusion: self.fusion.clone(),
            regime: self.regime.clone(),
            strategist: self.strategist.clone(),
            sentinel: self.sentinel.clone(),
            executor: self.executor.clone(),
            events: self.events.clone(),
            journal: self.journal.clone(),
            fanout: self.fanout.clone(),
            feeds: self.feeds.clone(),
            costs: self.costs.clone(),
            abort: self.abort.clone(),
        });

        let handle = spawn_scheduler(deps, interval, self.cycle_seq.clone(), reactive_rx);
        *self.scheduler.lock() = Some(handle.clone());
        handle
    }

    /// Graceful stop: cancel the in-flight cycle at its next yield point,
    /// halt the monitor, flush the journal.
    pub async fn stop(&self) {
        self.abort.store(true, Ordering::SeqCst);
        if let Some(handle) = self.scheduler.lock().clone() {
            handle.stop();
        }
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        self.journal.flush().await;
        info!("core stopped");
    }

    // -------------------------------------------------------------------------
    // Startup reconciliation
    // -------------------------------------------------------------------------

    /// Resolve orders persisted as PENDING/PARTIAL against the exchange and
    /// apply orphan fills to the ledger before any cycle runs.
    pub async fn reconcile_on_startup(&self) {
        let pending = match self.store.pending_orders() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "failed to list pending orders");
                return;
            }
        };

        for order in pending {
            match self.exchange.query_order(&order.order_id, &order.pair).await {
                Ok(result) => {
                    info!(
                        order_id = %order.order_id,
                        status = %result.status,
                        filled_base = result.filled_base,
                        "pending order reconciled"
                    );
                    let side = if order.action == "SELL" {
                        Side::Sell
                    } else {
                        Side::Buy
                    };
                    if result.filled_base > 0.0 {
                        if let Err(e) = self.ledger.apply_fill(&order.pair, side, &result) {
                            warn!(order_id = %order.order_id, error = %e, "orphan fill rejected");
                            continue;
                        }
                    }
                    self.journal.submit(WriteOp::Trade(TradeRecord {
                        order_id: result.order_id.clone(),
                        pair: order.pair.to_string(),
                        action: order.action.clone(),
                        requested_size: result.filled_base,
                        filled_base: result.filled_base,
                        filled_quote: result.filled_quote,
                        average_price: result.average_price,
                        status: if result.status.is_terminal() {
                            result.status.to_string()
                        } else {
                            OrderStatus::Canceled.to_string()
                        },
                        fees: result.fees,
                        realized_pnl: None,
                        entry_price: None,
                        exit_price: None,
                        execution_strategy: "RECONCILE".to_string(),
                        decision_ts: chrono::Utc::now().timestamp_millis(),
                        submitted_ts: None,
                        filled_ts: None,
                        latency_ms: None,
                    }));
                    // Anything still resting after a restart is cancelled.
                    if !result.status.is_terminal() {
                        let _ = self
                            .exchange
                            .cancel_order(&order.order_id, &order.pair)
                            .await;
                    }
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "pending order reconcile failed");
                }
            }
        }

        // Reconcile the quote balance from the exchange where available.
        if let Ok(balances) = self.exchange.get_balance().await {
            let quote = self.config.read().quote_currency.to_uppercase();
            if let Some(available) = balances.get(&quote) {
                self.ledger.reconcile_quote_balance(*available);
                info!(quote = %quote, available, "quote balance reconciled");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    pub fn trigger_cycle(&self) {
        if let Some(handle) = self.scheduler.lock().as_ref() {
            handle.trigger();
        }
    }

    pub fn pause(&self) {
        if let Some(handle) = self.scheduler.lock().as_ref() {
            handle.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(handle) = self.scheduler.lock().as_ref() {
            handle.resume();
        }
    }

    pub fn emergency_stop(&self) {
        warn!("emergency stop requested");
        self.abort.store(true, Ordering::SeqCst);
        if let Some(handle) = self.scheduler.lock().as_ref() {
            handle.emergency_stop();
        }
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
    }

    /// Apply the runtime-reconfigurable subset: weights, thresholds, and
    /// strategist mode.
    pub fn reload_partial(&self, patch: ConfigPatch) {
        let mut config = self.config.write();
        config.apply_patch(patch);

        self.fusion
            .replace_book(WeightBook::from_config(&config.fusion));
        self.sentinel
            .update_config(config.risk.clone(), &config.breakers);
        self.strategist.set_mode(config.strategist.mode);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn snapshot_portfolio(&self) -> Portfolio {
        self.ledger.snapshot()
    }

    pub fn recent_trades(&self, limit: usize) -> Vec<TradeRecord> {
        self.store.recent_trades(limit).unwrap_or_default()
    }

    pub fn recent_cycles(&self, limit: usize) -> Vec<CycleRecord> {
        self.scheduler
            .lock()
            .as_ref()
            .map(|h| h.recent_cycles(limit))
            .unwrap_or_default()
    }

    pub fn status(&self) -> CoreStatus {
        let scheduler = self
            .scheduler
            .lock()
            .as_ref()
            .map(|h| h.status())
            .unwrap_or_default();
        let snapshot = self.ledger.snapshot();

        CoreStatus {
            scheduler,
            uptime_secs: self.start_time.elapsed().as_secs(),
            breakers: self.sentinel.breaker_states(),
            costs: self.costs.totals(),
            open_positions: snapshot.positions.len(),
            total_value: snapshot.total_value,
        }
    }

    pub fn performance(&self) -> Performance {
        let snapshot = self.ledger.snapshot();
        let initial = self.ledger.initial_capital();
        let realized = self.ledger.total_realized_pnl();
        let unrealized = self.ledger.total_unrealized_pnl();
        let closed = self.ledger.recent_realized(usize::MAX);
        let wins = closed.iter().filter(|t| t.pnl > 0.0).count();

        Performance {
            initial_capital: initial,
            total_value: snapshot.total_value,
            return_pct: if initial > 0.0 {
                (snapshot.total_value - initial) / initial * 100.0
            } else {
                0.0
            },
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            total_fees: self.ledger.total_fees(),
            closed_trades: closed.len(),
            win_rate: if closed.is_empty() {
                0.0
            } else {
                wins as f64 / closed.len() as f64
            },
        }
    }

    pub fn breaker_state(&self) -> Vec<BreakerState> {
        self.sentinel.breaker_states()
    }

    /// Register a portfolio observer; snapshots are pushed on every change.
    pub fn subscribe_portfolio_updates(&self) -> mpsc::Receiver<Portfolio> {
        self.fanout.subscribe()
    }

    /// Flip realtime fan-out (polling fallback when off).
    pub fn set_realtime_fanout(&self, enabled: bool) {
        self.fanout.set_enabled(enabled);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ── External feed ingestion (pushed by the outer process) ────────────

    pub fn update_fear_greed(&self, value: f64) {
        self.feeds.set_fear_greed(value);
    }

    pub fn update_headlines(&self, headlines: Vec<Headline>) {
        self.feeds.set_headlines(headlines);
    }

    pub fn update_onchain(&self, netflow_score: f64) {
        self.feeds.set_onchain(netflow_score);
    }

    pub fn update_macro_bias(&self, bias: f64) {
        self.feeds.set_macro_bias(bias);
    }
}

/// Select and build the exchange adapter; missing credentials degrade real
/// to simulation.
fn build_exchange(config: &Config) -> Arc<dyn ExchangeApi> {
    match config.effective_exchange() {
        ExchangeSelector::Real => {
            let key = config.credentials.exchange_key.clone().unwrap_or_default();
            let secret = config
                .credentials
                .exchange_secret
                .clone()
                .unwrap_or_default();
            Arc::new(KrakenClient::new(key, secret))
        }
        ExchangeSelector::Simulation => {
            // Public market data needs no credentials; fills are synthetic.
            let data_source: Arc<dyn ExchangeApi> = Arc::new(KrakenClient::new("", ""));
            Arc::new(SimulatedExchange::new(
                config.quote_currency.clone(),
                config.initial_capital,
                Some(data_source),
            ))
        }
        ExchangeSelector::Mock => Arc::new(MockExchange::new()),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategistMode;
    use crate::exchange::OrderResult;
    use crate::types::Pair;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.exchange = ExchangeSelector::Mock;
        config.pairs = vec!["BTC/AUD".to_string()];
        config.persistence.db_path = dir
            .path()
            .join("core.db")
            .to_string_lossy()
            .into_owned();
        config
    }

    #[tokio::test]
    async fn init_validates_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.pairs = vec!["BTC/USD".to_string()]; // wrong quote
        assert!(Core::init(config).is_err());
    }

    #[tokio::test]
    async fn init_restores_breaker_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        {
            let store = Store::open(&config.persistence.db_path).unwrap();
            store
                .save_breaker_states(&[BreakerState {
                    name: "daily_loss".into(),
                    tripped: true,
                    tripped_at: Some(chrono::Utc::now()),
                    value: 0.15,
                    threshold: 0.10,
                    cooldown_until: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
                }])
                .unwrap();
        }

        let core = Core::init(config).unwrap();
        let breakers = core.breaker_state();
        let daily = breakers.iter().find(|b| b.name == "daily_loss").unwrap();
        assert!(daily.tripped);
    }

    #[tokio::test]
    async fn reload_partial_switches_strategist_mode() {
        let dir = tempfile::tempdir().unwrap();
        let core = Core::init(test_config(&dir)).unwrap();

        core.reload_partial(ConfigPatch {
            strategist_mode: Some(StrategistMode::Hybrid),
            min_confidence: Some(0.7),
            ..Default::default()
        });

        let config = core.config.read();
        // Without an LLM key the effective mode degrades, but the config
        // records the request and the threshold applies.
        assert_eq!(config.strategist.mode, StrategistMode::Hybrid);
        assert!((config.risk.min_confidence - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn performance_reflects_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let core = Core::init(test_config(&dir)).unwrap();

        let pair = Pair::new("BTC", "AUD");
        core.ledger
            .apply_fill(
                &pair,
                Side::Buy,
                &OrderResult {
                    order_id: "A".into(),
                    status: OrderStatus::Filled,
                    filled_base: 0.004,
                    filled_quote: 200.0,
                    average_price: 50_000.0,
                    fees: 0.0,
                    exchange_raw: serde_json::Value::Null,
                },
            )
            .unwrap();
        core.ledger
            .apply_fill(
                &pair,
                Side::Sell,
                &OrderResult {
                    order_id: "B".into(),
                    status: OrderStatus::Filled,
                    filled_base: 0.004,
                    filled_quote: 210.0,
                    average_price: 52_500.0,
                    fees: 0.0,
                    exchange_raw: serde_json::Value::Null,
                },
            )
            .unwrap();

        let perf = core.performance();
        assert!((perf.realized_pnl - 10.0).abs() < 1e-9);
        assert_eq!(perf.closed_trades, 1);
        assert!((perf.win_rate - 1.0).abs() < f64::EPSILON);
        assert!((perf.total_value - 1010.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn reconcile_applies_orphan_fills() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let pair = Pair::new("BTC", "AUD");

        // A PARTIAL buy persisted before a crash.
        {
            let store = Store::open(&config.persistence.db_path).unwrap();
            store
                .save_trade(&TradeRecord {
                    order_id: "ORPHAN-1".into(),
                    pair: pair.to_string(),
                    action: "BUY".into(),
                    requested_size: 200.0,
                    filled_base: 0.0,
                    filled_quote: 0.0,
                    average_price: 0.0,
                    status: "PARTIAL".into(),
                    fees: 0.0,
                    realized_pnl: None,
                    entry_price: None,
                    exit_price: None,
                    execution_strategy: "LIMIT".into(),
                    decision_ts: chrono::Utc::now().timestamp_millis(),
                    submitted_ts: None,
                    filled_ts: None,
                    latency_ms: None,
                })
                .unwrap();
        }

        // The mock exchange reports the order fully filled.
        let mock = Arc::new(MockExchange::new());
        mock.script_query(
            "ORPHAN-1",
            vec![OrderResult {
                order_id: "ORPHAN-1".into(),
                status: OrderStatus::Filled,
                filled_base: 0.004,
                filled_quote: 200.0,
                average_price: 50_000.0,
                fees: 0.0,
                exchange_raw: serde_json::Value::Null,
            }],
        );

        let core = Core::init_with_exchange(config, mock).unwrap();
        core.reconcile_on_startup().await;

        let position = core.ledger.position(&pair).unwrap();
        assert!((position.quantity_base - 0.004).abs() < 1e-12);
    }
}
