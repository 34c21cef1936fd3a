// =============================================================================
// Market Data — per-cycle snapshots and the bounded candle cache
// =============================================================================
//
// Market data is fetched fresh from the exchange adapter at the start of each
// per-pair step and assembled into an immutable `MarketData` snapshot. Candles
// are merged into a bounded per-(pair, interval) cache so indicator windows
// survive short fetch failures.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::exchange::{OrderBook, Ticker};
use crate::types::Pair;

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// A single OHLCV candle. Immutable once ingested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, UNIX milliseconds.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Composite key identifying one candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CandleKey {
    pub pair: Pair,
    pub interval_minutes: u32,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}m", self.pair, self.interval_minutes)
    }
}

/// Thread-safe bounded cache of the most recent candles per series.
///
/// Candles arrive oldest-first from `get_ohlcv`; `merge` deduplicates on open
/// time so overlapping fetches never double-insert, and the ring is trimmed
/// to `max_candles`.
pub struct CandleCache {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleCache {
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    /// Merge a freshly fetched batch (oldest first) into the series.
    pub fn merge(&self, key: CandleKey, batch: &[Candle]) {
        if batch.is_empty() {
            return;
        }
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles));

        for candle in batch {
            match ring.back() {
                Some(last) if candle.timestamp < last.timestamp => continue,
                Some(last) if candle.timestamp == last.timestamp => {
                    // Same open time — the fetch is fresher; replace in place.
                    ring.pop_back();
                    ring.push_back(*candle);
                }
                _ => ring.push_back(*candle),
            }
        }

        while ring.len() > self.max_candles {
            ring.pop_front();
        }
    }

    /// Return the most recent `count` candles, oldest first.
    pub fn window(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).copied().collect()
            }
            None => Vec::new(),
        }
    }

    /// Close price of the most recent cached candle, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        self.buffers.read().get(key).and_then(|r| r.back()).map(|c| c.close)
    }

    pub fn len(&self, key: &CandleKey) -> usize {
        self.buffers.read().get(key).map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Per-cycle snapshot
// ---------------------------------------------------------------------------

/// Everything a pair's analysts see for one cycle. Ephemeral — rebuilt every
/// cycle, never mutated after assembly.
#[derive(Debug, Clone)]
pub struct MarketData {
    pub pair: Pair,
    pub ticker: Ticker,
    /// Candle window, oldest first.
    pub candles: Vec<Candle>,
    pub order_book: OrderBook,
    pub fetched_at: DateTime<Utc>,
}

impl MarketData {
    pub fn last_price(&self) -> f64 {
        self.ticker.price
    }

    /// Closing prices extracted from the candle window, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}
