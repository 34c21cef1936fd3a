// =============================================================================
// Cycle Scheduler — cadenced pipeline driver with command channel
// =============================================================================
//
// A single task owns the cadence. Two inbound channels drive it: a monotonic
// timer tick and a command channel (trigger / pause / resume / stop /
// emergency stop). A third channel carries reactive nudges from the
// stop-loss monitor.
//
// Invariants:
//   - at most one cycle in flight at any moment;
//   - a manual trigger during a running cycle is coalesced to one pending;
//   - pause blocks scheduled cycles but lets the in-flight cycle finish;
//   - resume re-arms the timer at now + interval;
//   - stop raises the abort flag, which the cycle polls at its per-pair
//     yield points, then flushes state;
//   - a cycle reporting an invariant violation freezes the engine.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::cycle::{run_cycle, CycleDeps, CycleRecord};
use crate::persistence::WriteOp;
use crate::types::{CycleStatus, CycleTrigger};

/// Retained cycle records for status/performance queries.
const RECORD_RETENTION: usize = 128;

/// Scheduler control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Trigger,
    Pause,
    Resume,
    Stop,
    EmergencyStop,
}

/// Externally visible scheduler state.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStatus {
    pub cycle_count: u64,
    pub next_cycle_at: Option<DateTime<Utc>>,
    pub is_paused: bool,
    pub in_flight: bool,
    pub last_error: Option<String>,
    pub stopped: bool,
}

/// Handle for controlling and observing the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<Command>,
    status: Arc<RwLock<SchedulerStatus>>,
    records: Arc<RwLock<VecDeque<CycleRecord>>>,
}

impl SchedulerHandle {
    pub fn trigger(&self) {
        let _ = self.cmd_tx.try_send(Command::Trigger);
    }

    pub fn pause(&self) {
        let _ = self.cmd_tx.try_send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.cmd_tx.try_send(Command::Resume);
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.try_send(Command::Stop);
    }

    pub fn emergency_stop(&self) {
        let _ = self.cmd_tx.try_send(Command::EmergencyStop);
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.read().clone()
    }

    /// The most recent `count` cycle records, newest first.
    pub fn recent_cycles(&self, count: usize) -> Vec<CycleRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .take(count)
            .cloned()
            .collect()
    }
}

/// Spawn the scheduler task. `reactive_rx` carries stop-loss / breaker
/// nudges that request an immediate cycle.
pub fn spawn_scheduler(
    deps: Arc<CycleDeps>,
    interval: Duration,
    cycle_seq: Arc<AtomicU64>,
    mut reactive_rx: mpsc::Receiver<()>,
) -> SchedulerHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(16);
    let status = Arc::new(RwLock::new(SchedulerStatus::default()));
    let records = Arc::new(RwLock::new(VecDeque::new()));

    let handle = SchedulerHandle {
        cmd_tx,
        status: status.clone(),
        records: records.clone(),
    };

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs_f64(), "scheduler started");

        let mut paused = false;
        let mut stopping = false;
        // First cycle fires immediately.
        let mut next_deadline = Instant::now();

        loop {
            status.write().next_cycle_at =
                Some(Utc::now() + chrono::Duration::from_std(next_deadline - Instant::now())
                    .unwrap_or_else(|_| chrono::Duration::zero()));

            let trigger = tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        Command::Trigger => Some(CycleTrigger::Manual),
                        Command::Pause => {
                            info!("scheduler paused");
                            paused = true;
                            status.write().is_paused = true;
                            None
                        }
                        Command::Resume => {
                            info!("scheduler resumed");
                            paused = false;
                            status.write().is_paused = false;
                            next_deadline = Instant::now() + interval;
                            None
                        }
                        Command::Stop | Command::EmergencyStop => {
                            stopping = true;
                            None
                        }
                    }
                }
                Some(()) = reactive_rx.recv() => {
                    if !paused || deps.sentinel.run_when_paused_on_critical() {
                        info!("reactive trigger received");
                        Some(CycleTrigger::Reactive)
                    } else {
                        None
                    }
                }
                _ = tokio::time::sleep_until(next_deadline), if !paused => {
                    Some(CycleTrigger::Scheduled)
                }
                // Every channel closed while paused: nothing can ever wake
                // us again.
                else => {
                    stopping = true;
                    None
                }
            };

            if stopping {
                break;
            }

            let Some(trigger) = trigger else {
                continue;
            };

            let cycle_start = Instant::now();
            let (pending_trigger, stop_requested) = drive_cycle(
                &deps,
                &cycle_seq,
                trigger,
                &mut cmd_rx,
                &status,
                &records,
                &mut paused,
            )
            .await;

            if stop_requested || status.read().stopped {
                break;
            }

            // Monotonic cadence: a long cycle starts the next one
            // immediately, but cycles never overlap.
            next_deadline = (cycle_start + interval).max(Instant::now());

            if pending_trigger {
                // Coalesced manual trigger runs right away.
                let (_, stop_requested) = drive_cycle(
                    &deps,
                    &cycle_seq,
                    CycleTrigger::Manual,
                    &mut cmd_rx,
                    &status,
                    &records,
                    &mut paused,
                )
                .await;
                if stop_requested || status.read().stopped {
                    break;
                }
                next_deadline = (Instant::now() + interval).min(next_deadline);
            }
        }

        // Flush state on the way out.
        deps.journal
            .submit(WriteOp::Breakers(deps.sentinel.breaker_states()));
        deps.journal
            .submit(WriteOp::Snapshot(deps.ledger.snapshot()));
        deps.journal.flush().await;

        let mut s = status.write();
        s.stopped = true;
        s.in_flight = false;
        s.next_cycle_at = None;
        info!("scheduler stopped");
    });

    handle
}

/// Run one cycle while continuing to service commands. Returns
/// `(pending_manual_trigger, stop_requested)`.
async fn drive_cycle(
    deps: &Arc<CycleDeps>,
    cycle_seq: &Arc<AtomicU64>,
    trigger: CycleTrigger,
    cmd_rx: &mut mpsc::Receiver<Command>,
    status: &Arc<RwLock<SchedulerStatus>>,
    records: &Arc<RwLock<VecDeque<CycleRecord>>>,
    paused: &mut bool,
) -> (bool, bool) {
    let cycle_id = cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
    status.write().in_flight = true;

    let task_deps = deps.clone();
    let mut task = tokio::spawn(async move { run_cycle(&task_deps, cycle_id, trigger).await });

    let mut pending_trigger = false;
    let mut stop_requested = false;

    let record = loop {
        tokio::select! {
            result = &mut task => {
                match result {
                    Ok(record) => break record,
                    Err(e) => {
                        error!(cycle_id, error = %e, "cycle task panicked");
                        let mut s = status.write();
                        s.in_flight = false;
                        s.last_error = Some(format!("cycle task failed: {e}"));
                        return (pending_trigger, stop_requested);
                    }
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    // At most one pending manual trigger.
                    Command::Trigger => pending_trigger = true,
                    Command::Pause => {
                        *paused = true;
                        status.write().is_paused = true;
                    }
                    Command::Resume => {
                        *paused = false;
                        status.write().is_paused = false;
                    }
                    Command::Stop | Command::EmergencyStop => {
                        // Cancel at the next safe yield point.
                        deps.abort.store(true, Ordering::SeqCst);
                        stop_requested = true;
                    }
                }
            }
        }
    };

    let invariant_failure = record.status == CycleStatus::Failed;
    {
        let mut s = status.write();
        s.in_flight = false;
        s.cycle_count += 1;
        s.last_error = record.error.clone();
        if invariant_failure {
            s.stopped = true;
        }
    }

    if invariant_failure {
        warn!(
            cycle_id,
            error = ?record.error,
            "invariant violation — engine frozen pending review"
        );
        deps.abort.store(true, Ordering::SeqCst);
        stop_requested = true;
    }

    let mut ring = records.write();
    ring.push_back(record);
    while ring.len() > RECORD_RETENTION {
        ring.pop_front();
    }

    (pending_trigger && !stop_requested, stop_requested)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysts::{analyst_set, FeedStore};
    use crate::config::{Config, OrderStyle, Stage};
    use crate::costs::CostTracker;
    use crate::events::EventBus;
    use crate::exchange::{MockExchange, Ticker};
    use crate::executor::Executor;
    use crate::fanout::Fanout;
    use crate::fusion::{FusionEngine, WeightBook};
    use crate::ledger::Ledger;
    use crate::market_data::CandleCache;
    use crate::persistence::{Journal, Store};
    use crate::regime::RegimeDetector;
    use crate::sentinel::Sentinel;
    use crate::strategist::Strategist;
    use crate::types::Pair;
    use std::sync::atomic::AtomicBool;

    fn pair() -> Pair {
        Pair::new("BTC", "AUD")
    }

    fn deps() -> Arc<CycleDeps> {
        let mut config = Config::default();
        config.pairs = vec!["BTC/AUD".to_string()];
        config.stage = Stage::Stage1;
        config.execution.order_kind = OrderStyle::Market;
        config.execution.poll_ms = 1;

        let mock = Arc::new(MockExchange::new());
        mock.set_ticker(
            pair(),
            Ticker {
                price: 50_000.0,
                bid: 50_000.0,
                ask: 50_000.0,
                high_24h: 50_500.0,
                low_24h: 49_500.0,
                volume_24h: 1000.0,
            },
        );
        mock.set_flat_candles(pair(), 50_000.0, 120);

        let events = EventBus::new();
        let ledger = Arc::new(Ledger::new(1000.0, 16));
        let costs = Arc::new(CostTracker::new(5.0));
        let sentinel = Arc::new(Sentinel::new(
            config.risk.clone(),
            &config.breakers,
            1000.0,
            events.clone(),
        ));
        let executor = Arc::new(Executor::new(
            mock.clone(),
            ledger.clone(),
            events.clone(),
            config.execution.clone(),
        ));
        let store = Arc::new(Store::open_in_memory().unwrap());
        let journal = Journal::spawn(store, 64, events.clone());
        let strategist = Arc::new(Strategist::new(&config, costs.clone()));
        let stage = config.stage;

        Arc::new(CycleDeps {
            config: Arc::new(RwLock::new(config)),
            exchange: mock,
            ledger,
            candles: Arc::new(CandleCache::new(256)),
            analysts: analyst_set(stage),
            fusion: Arc::new(FusionEngine::new(WeightBook::seeded(), 0.5)),
            regime: Arc::new(RegimeDetector::new(Duration::from_secs(0))),
            strategist,
            sentinel,
            executor,
            events,
            journal,
            fanout: Arc::new(Fanout::new(true, 8)),
            feeds: Arc::new(FeedStore::new()),
            costs,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn wait_for_cycles(handle: &SchedulerHandle, count: u64) {
        for _ in 0..200 {
            if handle.status().cycle_count >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "scheduler never reached {count} cycles (at {})",
            handle.status().cycle_count
        );
    }

    #[tokio::test]
    async fn scheduled_cycles_run_on_cadence() {
        let deps = deps();
        let (_tx, rx) = mpsc::channel(4);
        let handle = spawn_scheduler(
            deps,
            Duration::from_millis(30),
            Arc::new(AtomicU64::new(0)),
            rx,
        );

        wait_for_cycles(&handle, 2).await;
        let status = handle.status();
        assert!(status.cycle_count >= 2);
        assert!(!status.is_paused);
        assert!(!status.stopped);

        // Cycle ids are strictly increasing in the record ring.
        let cycles = handle.recent_cycles(10);
        for window in cycles.windows(2) {
            assert!(window[0].cycle_id > window[1].cycle_id);
        }
        handle.stop();
    }

    #[tokio::test]
    async fn pause_blocks_scheduled_cycles_and_resume_rearms() {
        let deps = deps();
        let (_tx, rx) = mpsc::channel(4);
        let handle = spawn_scheduler(
            deps,
            Duration::from_millis(20),
            Arc::new(AtomicU64::new(0)),
            rx,
        );

        wait_for_cycles(&handle, 1).await;
        handle.pause();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let count_at_pause = handle.status().cycle_count;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status().cycle_count, count_at_pause);
        assert!(handle.status().is_paused);

        handle.resume();
        wait_for_cycles(&handle, count_at_pause + 1).await;
        handle.stop();
    }

    #[tokio::test]
    async fn manual_trigger_runs_immediately() {
        let deps = deps();
        let (_tx, rx) = mpsc::channel(4);
        // Long interval: only triggers can run cycles after the first.
        let handle = spawn_scheduler(
            deps,
            Duration::from_secs(3600),
            Arc::new(AtomicU64::new(0)),
            rx,
        );

        wait_for_cycles(&handle, 1).await;
        handle.trigger();
        wait_for_cycles(&handle, 2).await;

        let cycles = handle.recent_cycles(1);
        assert_eq!(cycles[0].trigger, CycleTrigger::Manual);
        handle.stop();
    }

    #[tokio::test]
    async fn reactive_nudge_runs_even_while_paused() {
        let deps = deps();
        let (reactive_tx, reactive_rx) = mpsc::channel(4);
        let handle = spawn_scheduler(
            deps,
            Duration::from_secs(3600),
            Arc::new(AtomicU64::new(0)),
            reactive_rx,
        );

        wait_for_cycles(&handle, 1).await;
        handle.pause();
        tokio::time::sleep(Duration::from_millis(30)).await;

        reactive_tx.send(()).await.unwrap();
        wait_for_cycles(&handle, 2).await;

        let cycles = handle.recent_cycles(1);
        assert_eq!(cycles[0].trigger, CycleTrigger::Reactive);
        handle.stop();
    }

    #[tokio::test]
    async fn stop_halts_cycles_and_flushes() {
        let deps = deps();
        let abort = deps.abort.clone();
        let (_tx, rx) = mpsc::channel(4);
        let handle = spawn_scheduler(
            deps,
            Duration::from_millis(20),
            Arc::new(AtomicU64::new(0)),
            rx,
        );

        wait_for_cycles(&handle, 1).await;
        handle.stop();

        for _ in 0..100 {
            if handle.status().stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.status().stopped);

        let count = handle.status().cycle_count;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // No further cycles after stop.
        assert_eq!(handle.status().cycle_count, count);
        assert!(abort.load(Ordering::SeqCst) || handle.status().stopped);
    }
}
