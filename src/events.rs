// =============================================================================
// Event Bus — typed engine events with at-least-once in-process delivery
// =============================================================================
//
// Built on a broadcast channel: every subscriber has its own bounded queue
// and a lagging subscriber loses the oldest events first, preserving
// liveness. Consumers must be idempotent.
//
// Persistence of events is a subscriber like any other (see persistence.rs),
// so a slow disk can never stall the decision path.
// =============================================================================

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::analysts::Signal;
use crate::cycle::Decision;
use crate::exchange::{OrderKind, OrderResult};
use crate::types::{CycleStatus, CycleTrigger, Pair, Side};

/// Per-subscriber queue capacity.
const BUS_CAPACITY: usize = 256;

/// Every event the core emits.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    CycleStarted {
        cycle_id: u64,
        trigger: CycleTrigger,
    },
    CycleFinished {
        cycle_id: u64,
        status: CycleStatus,
        decisions: usize,
    },
    SignalEmitted {
        cycle_id: u64,
        signal: Signal,
    },
    DecisionMade {
        decision: Decision,
    },
    OrderPlaced {
        cycle_id: u64,
        pair: Pair,
        side: Side,
        kind: OrderKind,
        order_id: String,
        size: f64,
    },
    OrderFilled {
        cycle_id: u64,
        pair: Pair,
        side: Side,
        result: OrderResult,
    },
    BreakerTripped {
        name: String,
        value: f64,
        threshold: f64,
    },
    BreakerCleared {
        name: String,
    },
    StopLossTriggered {
        pair: Pair,
        price: f64,
        stop: f64,
    },
    /// Operational degradation worth surfacing (dropped writes, skipped
    /// pairs, reconcile failures).
    Warning {
        source: String,
        message: String,
    },
}

impl Event {
    /// Stable kind tag, used as the `events.type` column.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CycleStarted { .. } => "CycleStarted",
            Self::CycleFinished { .. } => "CycleFinished",
            Self::SignalEmitted { .. } => "SignalEmitted",
            Self::DecisionMade { .. } => "DecisionMade",
            Self::OrderPlaced { .. } => "OrderPlaced",
            Self::OrderFilled { .. } => "OrderFilled",
            Self::BreakerTripped { .. } => "BreakerTripped",
            Self::BreakerCleared { .. } => "BreakerCleared",
            Self::StopLossTriggered { .. } => "StopLossTriggered",
            Self::Warning { .. } => "Warning",
        }
    }
}

/// Multi-producer, multi-consumer bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Never blocks; with no subscribers the event is
    /// simply dropped (persistence subscribes at startup).
    pub fn publish(&self, event: Event) {
        debug!(kind = event.kind(), "event published");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
