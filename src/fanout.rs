// =============================================================================
// Live Update Fan-out — portfolio snapshots to subscribed observers
// =============================================================================
//
// Best-effort delivery over per-subscriber bounded channels. A subscriber
// that misses `slow_consumer_threshold` consecutive broadcasts is dropped so
// one stalled observer can never pin memory. With realtime fan-out disabled
// the component is idle and observers fall back to polling.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ledger::Portfolio;

/// Per-subscriber queue depth.
const SUBSCRIBER_CAPACITY: usize = 16;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Portfolio>,
    missed: u32,
}

pub struct Fanout {
    subscribers: Mutex<Vec<Subscriber>>,
    enabled: AtomicBool,
    slow_threshold: u32,
    next_id: AtomicU64,
}

impl Fanout {
    pub fn new(enabled: bool, slow_threshold: u32) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(enabled),
            slow_threshold: slow_threshold.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer. The returned receiver yields a snapshot per
    /// portfolio change until the subscriber is dropped for falling behind.
    pub fn subscribe(&self) -> mpsc::Receiver<Portfolio> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push(Subscriber {
            id,
            tx,
            missed: 0,
        });
        debug!(subscriber = id, "portfolio subscriber registered");
        rx
    }

    /// Broadcast a snapshot to every live subscriber.
    pub fn broadcast(&self, snapshot: &Portfolio) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }

        let threshold = self.slow_threshold;
        let mut subscribers = self.subscribers.lock();
        subscribers.retain_mut(|sub| {
            match sub.tx.try_send(snapshot.clone()) {
                Ok(()) => {
                    sub.missed = 0;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.missed += 1;
                    if sub.missed >= threshold {
                        warn!(
                            subscriber = sub.id,
                            missed = sub.missed,
                            "slow subscriber dropped"
                        );
                        false
                    } else {
                        true
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = sub.id, "subscriber disconnected");
                    false
                }
            }
        });
    }

    /// Flip realtime broadcasting. Disabled means polling mode: the
    /// component goes idle but keeps its subscriber list.
    pub fn set_enabled(&self, enabled: bool) {
        info!(enabled, "realtime fan-out toggled");
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn snapshot(total: f64) -> Portfolio {
        Portfolio {
            available_quote: total,
            positions: HashMap::new(),
            total_value: total,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_broadcasts() {
        let fanout = Fanout::new(true, 8);
        let mut rx = fanout.subscribe();

        fanout.broadcast(&snapshot(1000.0));
        let update = rx.recv().await.unwrap();
        assert!((update.total_value - 1000.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn disabled_fanout_is_idle() {
        let fanout = Fanout::new(false, 8);
        let mut rx = fanout.subscribe();

        fanout.broadcast(&snapshot(1000.0));
        assert!(rx.try_recv().is_err());
        assert_eq!(fanout.subscriber_count(), 1);

        fanout.set_enabled(true);
        fanout.broadcast(&snapshot(2000.0));
        assert!((rx.recv().await.unwrap().total_value - 2000.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_after_threshold() {
        let fanout = Fanout::new(true, 3);
        // Keep the receiver alive but never drain it.
        let _rx = fanout.subscribe();

        // Fill the bounded queue, then miss `threshold` times.
        for _ in 0..SUBSCRIBER_CAPACITY {
            fanout.broadcast(&snapshot(1.0));
        }
        assert_eq!(fanout.subscriber_count(), 1);
        for _ in 0..3 {
            fanout.broadcast(&snapshot(1.0));
        }
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned() {
        let fanout = Fanout::new(true, 8);
        let rx = fanout.subscribe();
        drop(rx);

        fanout.broadcast(&snapshot(1.0));
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn draining_subscriber_resets_missed_count() {
        let fanout = Fanout::new(true, 2);
        let mut rx = fanout.subscribe();

        fanout.broadcast(&snapshot(1.0));
        assert!(rx.recv().await.is_some());
        // One miss is forgiven once the subscriber catches up.
        for _ in 0..SUBSCRIBER_CAPACITY {
            fanout.broadcast(&snapshot(2.0));
        }
        fanout.broadcast(&snapshot(3.0)); // missed = 1
        while rx.try_recv().is_ok() {}
        fanout.broadcast(&snapshot(4.0)); // delivered, missed resets
        assert_eq!(fanout.subscriber_count(), 1);
    }
}
