// =============================================================================
// Portfolio Ledger — authoritative balances, positions, and realized P&L
// =============================================================================
//
// Single-writer: every mutation flows through `apply_fill`. Readers get
// immutable `Portfolio` snapshots. Entry prices are tracked as the weighted
// average across buy fills; realized P&L is recorded on sells; a position is
// destroyed (entry cleared) the moment its quantity returns to zero.
//
// Value computation uses the last known price per pair — a stale feed keeps
// the previous mark, never zero.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::exchange::OrderResult;
use crate::types::{Pair, Side};

/// Quantity below which a position is considered fully closed.
const DUST_QUANTITY: f64 = 1e-9;

/// A logic-invariant violation. The core responds with an emergency stop;
/// the ledger itself never papers over one.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),
}

/// An open holding in one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub pair: Pair,
    pub quantity_base: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<f64>,
    pub unrealized_pnl: f64,
    pub current_value: f64,
}

/// Immutable snapshot of the whole portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub available_quote: f64,
    /// Keyed by canonical pair form.
    pub positions: HashMap<String, Position>,
    pub total_value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Portfolio {
    pub fn position(&self, pair: &Pair) -> Option<&Position> {
        self.positions.get(&pair.to_string())
    }

    /// Total value currently deployed into positions.
    pub fn invested_value(&self) -> f64 {
        self.positions.values().map(|p| p.current_value).sum()
    }
}

/// A realized (fully or partially closed) trade outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedTrade {
    pub pair: Pair,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub fees: f64,
    pub closed_at: DateTime<Utc>,
}

struct Inner {
    available_quote: f64,
    positions: HashMap<Pair, Position>,
    last_prices: HashMap<Pair, f64>,
    realized: VecDeque<RealizedTrade>,
    snapshots: VecDeque<Portfolio>,
    total_fees: f64,
}

/// Thread-safe ledger. Writer is the executor; everyone else reads snapshots.
pub struct Ledger {
    inner: RwLock<Inner>,
    initial_capital: f64,
    snapshot_retention: usize,
}

/// Bounded realized-trade history (enough for any rolling 24 h window).
const REALIZED_RETENTION: usize = 2048;

impl Ledger {
    pub fn new(initial_capital: f64, snapshot_retention: usize) -> Self {
        info!(initial_capital, "ledger initialised");
        Self {
            inner: RwLock::new(Inner {
                available_quote: initial_capital,
                positions: HashMap::new(),
                last_prices: HashMap::new(),
                realized: VecDeque::new(),
                snapshots: VecDeque::new(),
                total_fees: 0.0,
            }),
            initial_capital,
            snapshot_retention,
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Apply a confirmed fill. Returns the post-fill snapshot.
    pub fn apply_fill(
        &self,
        pair: &Pair,
        side: Side,
        fill: &OrderResult,
    ) -> Result<Portfolio, LedgerError> {
        if fill.filled_base <= 0.0 {
            debug!(pair = %pair, order_id = %fill.order_id, "zero fill — ledger unchanged");
            return Ok(self.snapshot());
        }

        {
            let mut inner = self.inner.write();
            inner.total_fees += fill.fees;
            inner
                .last_prices
                .insert(pair.clone(), fill.average_price);

            match side {
                Side::Buy => {
                    let cost = fill.filled_quote + fill.fees;
                    if inner.available_quote - cost < -1e-6 {
                        return Err(LedgerError::InvariantViolation(format!(
                            "buy fill would drive quote balance negative: {:.6} - {:.6}",
                            inner.available_quote, cost
                        )));
                    }
                    inner.available_quote -= cost;

                    let position =
                        inner
                            .positions
                            .entry(pair.clone())
                            .or_insert_with(|| Position {
                                pair: pair.clone(),
                                quantity_base: 0.0,
                                entry_price: 0.0,
                                entry_time: Utc::now(),
                                stop_loss: None,
                                unrealized_pnl: 0.0,
                                current_value: 0.0,
                            });

                    // Weighted-average entry across fills.
                    let old_qty = position.quantity_base;
                    let new_qty = old_qty + fill.filled_base;
                    position.entry_price = (old_qty * position.entry_price
                        + fill.filled_base * fill.average_price)
                        / new_qty;
                    position.quantity_base = new_qty;

                    debug!(
                        pair = %pair,
                        qty = new_qty,
                        entry = position.entry_price,
                        "buy fill applied"
                    );
                }
                Side::Sell => {
                    let position = inner.positions.get_mut(pair).ok_or_else(|| {
                        LedgerError::InvariantViolation(format!(
                            "sell fill for {pair} with no open position"
                        ))
                    })?;
                    if position.quantity_base + DUST_QUANTITY < fill.filled_base {
                        return Err(LedgerError::InvariantViolation(format!(
                            "sell fill {:.8} exceeds held quantity {:.8} on {pair}",
                            fill.filled_base, position.quantity_base
                        )));
                    }

                    let entry_price = position.entry_price;
                    position.quantity_base -= fill.filled_base;
                    inner.available_quote += fill.filled_quote - fill.fees;

                    let pnl =
                        (fill.average_price - entry_price) * fill.filled_base - fill.fees;
                    inner.realized.push_back(RealizedTrade {
                        pair: pair.clone(),
                        quantity: fill.filled_base,
                        entry_price,
                        exit_price: fill.average_price,
                        pnl,
                        fees: fill.fees,
                        closed_at: Utc::now(),
                    });
                    while inner.realized.len() > REALIZED_RETENTION {
                        inner.realized.pop_front();
                    }

                    // Quantity back to zero destroys the position.
                    if inner
                        .positions
                        .get(pair)
                        .map(|p| p.quantity_base <= DUST_QUANTITY)
                        .unwrap_or(false)
                    {
                        inner.positions.remove(pair);
                        debug!(pair = %pair, pnl, "position fully closed");
                    } else {
                        debug!(pair = %pair, pnl, "position partially closed");
                    }
                }
            }
        }

        Ok(self.snapshot())
    }

    /// Refresh the mark price for a pair and revalue its position.
    pub fn update_price(&self, pair: &Pair, price: f64) {
        if price <= 0.0 {
            warn!(pair = %pair, price, "ignoring non-positive price update");
            return;
        }
        let mut inner = self.inner.write();
        inner.last_prices.insert(pair.clone(), price);
        if let Some(position) = inner.positions.get_mut(pair) {
            position.current_value = position.quantity_base * price;
            position.unrealized_pnl =
                (price - position.entry_price) * position.quantity_base;
        }
    }

    /// Attach a stop-loss level to an open position.
    pub fn set_stop_loss(&self, pair: &Pair, stop: f64) {
        if let Some(position) = self.inner.write().positions.get_mut(pair) {
            position.stop_loss = Some(stop);
            debug!(pair = %pair, stop, "stop-loss attached");
        }
    }

    /// Restore a position found in persistence at startup. Does not touch the
    /// quote balance — balances are reconciled separately from the exchange.
    pub fn restore_position(&self, position: Position) {
        let mut inner = self.inner.write();
        inner
            .last_prices
            .insert(position.pair.clone(), position.entry_price);
        inner.positions.insert(position.pair.clone(), position);
    }

    /// Overwrite the available quote balance (startup reconciliation only).
    pub fn reconcile_quote_balance(&self, available: f64) {
        self.inner.write().available_quote = available;
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Build a fresh snapshot, retaining it in the bounded ring.
    pub fn snapshot(&self) -> Portfolio {
        let mut inner = self.inner.write();

        let mut positions = HashMap::new();
        let mut invested = 0.0;
        let last_prices = inner.last_prices.clone();
        for (pair, position) in inner.positions.iter_mut() {
            // Stale price -> last known mark, never zero.
            let price = last_prices
                .get(pair)
                .copied()
                .filter(|p| *p > 0.0)
                .unwrap_or(position.entry_price);
            position.current_value = position.quantity_base * price;
            position.unrealized_pnl =
                (price - position.entry_price) * position.quantity_base;
            invested += position.current_value;
            positions.insert(pair.to_string(), position.clone());
        }

        let snapshot = Portfolio {
            available_quote: inner.available_quote,
            positions,
            total_value: inner.available_quote + invested,
            timestamp: Utc::now(),
        };

        inner.snapshots.push_back(snapshot.clone());
        while inner.snapshots.len() > self.snapshot_retention {
            inner.snapshots.pop_front();
        }

        snapshot
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.inner.read().positions.values().cloned().collect()
    }

    pub fn position(&self, pair: &Pair) -> Option<Position> {
        self.inner.read().positions.get(pair).cloned()
    }

    pub fn last_price(&self, pair: &Pair) -> Option<f64> {
        self.inner.read().last_prices.get(pair).copied()
    }

    /// Realized trades closed at or after `cutoff`, oldest first.
    pub fn realized_since(&self, cutoff: DateTime<Utc>) -> Vec<RealizedTrade> {
        self.inner
            .read()
            .realized
            .iter()
            .filter(|t| t.closed_at >= cutoff)
            .cloned()
            .collect()
    }

    /// The most recent `count` realized trades, newest first.
    pub fn recent_realized(&self, count: usize) -> Vec<RealizedTrade> {
        self.inner
            .read()
            .realized
            .iter()
            .rev()
            .take(count)
            .cloned()
            .collect()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.inner.read().realized.iter().map(|t| t.pnl).sum()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.inner
            .read()
            .positions
            .values()
            .map(|p| p.unrealized_pnl)
            .sum()
    }

    pub fn total_fees(&self) -> f64 {
        self.inner.read().total_fees
    }

    pub fn recent_snapshots(&self, count: usize) -> Vec<Portfolio> {
        self.inner
            .read()
            .snapshots
            .iter()
            .rev()
            .take(count)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Ledger")
            .field("available_quote", &inner.available_quote)
            .field("open_positions", &inner.positions.len())
            .field("realized_trades", &inner.realized.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderStatus;

    fn pair() -> Pair {
        Pair::new("BTC", "AUD")
    }

    fn fill(base: f64, price: f64, fees: f64) -> OrderResult {
        OrderResult {
            order_id: "T-1".into(),
            status: OrderStatus::Filled,
            filled_base: base,
            filled_quote: base * price,
            average_price: price,
            fees,
            exchange_raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn buy_fill_moves_quote_into_position() {
        let ledger = Ledger::new(1000.0, 8);
        let snapshot = ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.004, 50_000.0, 0.0))
            .unwrap();

        assert!((snapshot.available_quote - 800.0).abs() < 1e-6);
        let position = snapshot.position(&pair()).unwrap();
        assert!((position.quantity_base - 0.004).abs() < 1e-12);
        assert!((position.entry_price - 50_000.0).abs() < 1e-9);
        // total_value == available + Σ qty * price
        assert!((snapshot.total_value - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn second_buy_weights_entry_price() {
        let ledger = Ledger::new(10_000.0, 8);
        ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.01, 50_000.0, 0.0))
            .unwrap();
        ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.01, 60_000.0, 0.0))
            .unwrap();

        let position = ledger.position(&pair()).unwrap();
        assert!((position.quantity_base - 0.02).abs() < 1e-12);
        assert!((position.entry_price - 55_000.0).abs() < 1e-6);
    }

    #[test]
    fn sell_fill_realizes_pnl_and_clears_position() {
        let ledger = Ledger::new(1000.0, 8);
        ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.004, 50_000.0, 0.0))
            .unwrap();

        let snapshot = ledger
            .apply_fill(&pair(), Side::Sell, &fill(0.004, 47_400.0, 0.0))
            .unwrap();

        assert!(snapshot.position(&pair()).is_none());
        let realized = ledger.recent_realized(1);
        assert_eq!(realized.len(), 1);
        // (47400 - 50000) * 0.004 = -10.4
        assert!((realized[0].pnl + 10.4).abs() < 1e-6);
        assert!((snapshot.available_quote - (800.0 + 189.6)).abs() < 1e-6);
    }

    #[test]
    fn fees_reduce_quote_on_both_sides() {
        let ledger = Ledger::new(1000.0, 8);
        ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.004, 50_000.0, 1.0))
            .unwrap();
        assert!((ledger.snapshot().available_quote - 799.0).abs() < 1e-6);

        ledger
            .apply_fill(&pair(), Side::Sell, &fill(0.004, 50_000.0, 1.0))
            .unwrap();
        // 799 + 200 - 1
        assert!((ledger.snapshot().available_quote - 998.0).abs() < 1e-6);
        assert!((ledger.total_fees() - 2.0).abs() < 1e-12);
        // Realized pnl reflects the exit fee.
        assert!((ledger.total_realized_pnl() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn overdraw_buy_is_invariant_violation() {
        let ledger = Ledger::new(100.0, 8);
        let err = ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.004, 50_000.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }

    #[test]
    fn unmatched_sell_is_invariant_violation() {
        let ledger = Ledger::new(1000.0, 8);
        let err = ledger
            .apply_fill(&pair(), Side::Sell, &fill(0.004, 50_000.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));
    }

    #[test]
    fn price_update_marks_position_to_market() {
        let ledger = Ledger::new(1000.0, 8);
        ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.004, 50_000.0, 0.0))
            .unwrap();

        ledger.update_price(&pair(), 52_000.0);
        let snapshot = ledger.snapshot();
        let position = snapshot.position(&pair()).unwrap();
        assert!((position.unrealized_pnl - 8.0).abs() < 1e-9);
        assert!((snapshot.total_value - (800.0 + 0.004 * 52_000.0)).abs() < 1e-6);
    }

    #[test]
    fn stale_price_keeps_last_mark() {
        let ledger = Ledger::new(1000.0, 8);
        ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.004, 50_000.0, 0.0))
            .unwrap();
        ledger.update_price(&pair(), 51_000.0);
        // No further updates: snapshot still values at 51k, not zero.
        let snapshot = ledger.snapshot();
        assert!((snapshot.total_value - (800.0 + 0.004 * 51_000.0)).abs() < 1e-6);
    }

    #[test]
    fn snapshot_ring_is_bounded() {
        let ledger = Ledger::new(1000.0, 3);
        for _ in 0..10 {
            ledger.snapshot();
        }
        assert_eq!(ledger.recent_snapshots(100).len(), 3);
    }

    #[test]
    fn pnl_accounting_identity() {
        // Realized P&L absorbs exit fees; entry fees only reduce cash. So
        // Σ realized + Σ unrealized == total_value - initial + Σ entry_fees.
        let ledger = Ledger::new(1000.0, 8);
        let buy_fee = 0.5;
        ledger
            .apply_fill(&pair(), Side::Buy, &fill(0.004, 50_000.0, buy_fee))
            .unwrap();
        ledger.update_price(&pair(), 49_000.0);
        ledger
            .apply_fill(&pair(), Side::Sell, &fill(0.002, 49_000.0, 0.3))
            .unwrap();
        ledger.update_price(&pair(), 51_000.0);

        // realized = (49000 - 50000) * 0.002 - 0.3 = -2.3
        assert!((ledger.total_realized_pnl() + 2.3).abs() < 1e-9);
        // unrealized = (51000 - 50000) * 0.002 = 2.0
        assert!((ledger.total_unrealized_pnl() - 2.0).abs() < 1e-9);

        let snapshot = ledger.snapshot();
        let lhs = ledger.total_realized_pnl() + ledger.total_unrealized_pnl();
        let rhs = snapshot.total_value - 1000.0 + buy_fee;
        assert!((lhs - rhs).abs() < 1e-6, "lhs={lhs} rhs={rhs}");
    }
}
