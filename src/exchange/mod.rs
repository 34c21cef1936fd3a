// =============================================================================
// Exchange Adapter — uniform capability surface over concrete exchanges
// =============================================================================
//
// Everything beyond this boundary speaks canonical types: string order ids,
// the five-state order status, and the six error kinds. Raw exchange payloads
// are kept only as an opaque `exchange_raw` attachment for audit.
//
// Rounding happens here and nowhere else: base quantities are floored to the
// pair's step size, prices rounded to its tick size, and orders whose quote
// notional is below the minimum are rejected before any request leaves the
// process.
// =============================================================================

pub mod kraken;
pub mod mock;
pub mod simulation;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::market_data::Candle;
use crate::types::{Pair, Side};

pub use kraken::KrakenClient;
pub use mock::MockExchange;
pub use simulation::SimulatedExchange;

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Canonical failure kinds for every adapter operation.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("filter rejected: {0}")]
    FilterRejected(String),

    #[error("unknown exchange error: {0}")]
    Unknown(String),
}

impl ExchangeError {
    /// Transient failures are worth a bounded retry; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimit(_))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Spot ticker snapshot for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Order book snapshot. Bids are price-descending, asks price-ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Total base quantity within the top `levels` of one side.
    pub fn depth(&self, side: Side, levels: usize) -> f64 {
        let book = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        book.iter().take(levels).map(|l| l.quantity).sum()
    }
}

/// Exchange trading filters for one pair. Cached by adapters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairFilters {
    /// Base quantity increment.
    pub step_size: f64,
    /// Price increment.
    pub tick_size: f64,
    /// Minimum quote notional per order.
    pub min_notional: f64,
}

impl Default for PairFilters {
    fn default() -> Self {
        Self {
            step_size: 1e-8,
            tick_size: 0.01,
            min_notional: 10.0,
        }
    }
}

impl PairFilters {
    /// Floor a base quantity to an integer multiple of the step size.
    pub fn round_base_down(&self, quantity: f64) -> f64 {
        if self.step_size <= 0.0 {
            return quantity;
        }
        (quantity / self.step_size).floor() * self.step_size
    }

    /// Round a price to the nearest tick.
    pub fn round_price(&self, price: f64) -> f64 {
        if self.tick_size <= 0.0 {
            return price;
        }
        (price / self.tick_size).round() * self.tick_size
    }

    /// Reject orders whose quote notional is below the exchange minimum.
    pub fn check_notional(&self, quote_notional: f64) -> Result<(), ExchangeError> {
        if quote_notional < self.min_notional {
            return Err(ExchangeError::FilterRejected(format!(
                "notional {quote_notional:.2} below minimum {:.2}",
                self.min_notional
            )));
        }
        Ok(())
    }
}

/// Order placement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
        }
    }
}

/// A fully specified order, sized per the quote/base convention:
/// market BUYs carry quote notional in `size`, everything else base quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: Pair,
    pub side: Side,
    pub kind: OrderKind,
    pub size: f64,
    pub price: Option<f64>,
    pub time_in_force: Option<String>,
    /// Client-side idempotence key. Adapters must not create a second order
    /// for a request id they have already accepted.
    pub request_id: String,
}

impl OrderRequest {
    pub fn market(pair: Pair, side: Side, size: f64, request_id: String) -> Self {
        Self {
            pair,
            side,
            kind: OrderKind::Market,
            size,
            price: None,
            time_in_force: None,
            request_id,
        }
    }

    pub fn limit(pair: Pair, side: Side, size: f64, price: f64, request_id: String) -> Self {
        Self {
            pair,
            side,
            kind: OrderKind::Limit,
            size,
            price: Some(price),
            time_in_force: Some("GTC".to_string()),
            request_id,
        }
    }
}

/// Canonical order status. Exchange-specific strings are normalized to this
/// set at the adapter boundary and never leak past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Canceled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Filled => write!(f, "FILLED"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Normalized order state returned by every adapter operation that touches an
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_base: f64,
    pub filled_quote: f64,
    pub average_price: f64,
    /// Fees denominated in the quote currency.
    pub fees: f64,
    /// Raw exchange payload, for audit only.
    #[serde(default)]
    pub exchange_raw: serde_json::Value,
}

impl OrderResult {
    /// An order that failed before any fill.
    pub fn failed(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: OrderStatus::Failed,
            filled_base: 0.0,
            filled_quote: 0.0,
            average_price: 0.0,
            fees: 0.0,
            exchange_raw: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Uniform exchange capability. All operations are cancel-safe and fail with
/// an [`ExchangeError`] kind; callers decide retry policy from
/// [`ExchangeError::is_transient`].
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError>;

    /// Candles oldest-first.
    async fn get_ohlcv(
        &self,
        pair: &Pair,
        interval_minutes: u32,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_order_book(&self, pair: &Pair, depth: usize)
        -> Result<OrderBook, ExchangeError>;

    /// Free balances per asset.
    async fn get_balance(&self) -> Result<HashMap<String, f64>, ExchangeError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError>;

    async fn query_order(&self, order_id: &str, pair: &Pair)
        -> Result<OrderResult, ExchangeError>;

    async fn cancel_order(&self, order_id: &str, pair: &Pair)
        -> Result<OrderResult, ExchangeError>;

    /// Trading filters for a pair; implementations cache this.
    async fn get_exchange_info(&self, pair: &Pair) -> Result<PairFilters, ExchangeError>;

    /// Pairs listed against the given quote currency.
    async fn get_listed_pairs(&self, quote: &str) -> Result<Vec<Pair>, ExchangeError>;
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_rounding_floors() {
        let filters = PairFilters {
            step_size: 0.001,
            tick_size: 0.5,
            min_notional: 10.0,
        };
        let rounded = filters.round_base_down(0.0049);
        assert!((rounded - 0.004).abs() < 1e-12);
        // Result is always an integer multiple of step_size.
        let steps = rounded / filters.step_size;
        assert!((steps - steps.round()).abs() < 1e-9);
    }

    #[test]
    fn tick_rounding_nearest() {
        let filters = PairFilters {
            step_size: 0.001,
            tick_size: 0.5,
            min_notional: 10.0,
        };
        assert!((filters.round_price(100.3) - 100.5).abs() < 1e-12);
        assert!((filters.round_price(100.2) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn notional_check_rejects_below_minimum() {
        let filters = PairFilters::default();
        assert!(matches!(
            filters.check_notional(9.99),
            Err(ExchangeError::FilterRejected(_))
        ));
        assert!(filters.check_notional(10.0).is_ok());
    }

    #[test]
    fn transient_classification() {
        assert!(ExchangeError::Network("timeout".into()).is_transient());
        assert!(ExchangeError::RateLimit("429".into()).is_transient());
        assert!(!ExchangeError::Auth("bad key".into()).is_transient());
        assert!(!ExchangeError::FilterRejected("notional".into()).is_transient());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn book_depth_sums_top_levels() {
        let book = OrderBook {
            bids: vec![
                BookLevel { price: 99.0, quantity: 1.0 },
                BookLevel { price: 98.0, quantity: 2.0 },
                BookLevel { price: 97.0, quantity: 4.0 },
            ],
            asks: vec![
                BookLevel { price: 101.0, quantity: 3.0 },
            ],
        };
        assert!((book.depth(Side::Buy, 2) - 3.0).abs() < 1e-12);
        assert!((book.depth(Side::Sell, 5) - 3.0).abs() < 1e-12);
        assert_eq!(book.best_bid(), Some(99.0));
        assert_eq!(book.best_ask(), Some(101.0));
    }
}
