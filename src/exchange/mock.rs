// =============================================================================
// Mock Exchange — deterministic scripted adapter for tests
// =============================================================================
//
// Behaviour is fully scripted: canned tickers/candles/books, an optional
// queue of placement outcomes, and per-order query sequences. With no script
// installed, placements fill immediately and completely at the canned ticker
// price with zero fees, which keeps simple pipeline tests terse.
//
// Every placement and cancellation is recorded for assertion.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::market_data::Candle;
use crate::types::{Pair, Side};

use super::{
    ExchangeApi, ExchangeError, OrderBook, OrderKind, OrderRequest, OrderResult, OrderStatus,
    PairFilters, Ticker,
};

/// Scripted, deterministic exchange for tests.
#[derive(Default)]
pub struct MockExchange {
    tickers: RwLock<HashMap<Pair, Ticker>>,
    candles: RwLock<HashMap<Pair, Vec<Candle>>>,
    books: RwLock<HashMap<Pair, OrderBook>>,
    balances: RwLock<HashMap<String, f64>>,
    filters: RwLock<PairFilters>,

    /// Scripted outcomes consumed by successive `place_order` calls.
    placements: RwLock<VecDeque<Result<OrderResult, ExchangeError>>>,
    /// Scripted states consumed by successive `query_order` calls per order.
    query_scripts: RwLock<HashMap<String, VecDeque<OrderResult>>>,
    /// Last observed state per order, returned when a script runs dry.
    last_state: RwLock<HashMap<String, OrderResult>>,

    /// request_id -> first placement result, for idempotence.
    seen_requests: RwLock<HashMap<String, OrderResult>>,

    pub placed: RwLock<Vec<OrderRequest>>,
    pub canceled: RwLock<Vec<String>>,

    order_seq: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: a mock with one pair priced flat at `price`.
    pub fn with_flat_price(pair: Pair, price: f64) -> Self {
        let mock = Self::new();
        mock.set_ticker(
            pair.clone(),
            Ticker {
                price,
                bid: price * 0.9995,
                ask: price * 1.0005,
                high_24h: price * 1.01,
                low_24h: price * 0.99,
                volume_24h: 1000.0,
            },
        );
        mock.set_flat_candles(pair, price, 120);
        mock
    }

    pub fn set_ticker(&self, pair: Pair, ticker: Ticker) {
        self.tickers.write().insert(pair, ticker);
    }

    pub fn set_candles(&self, pair: Pair, candles: Vec<Candle>) {
        self.candles.write().insert(pair, candles);
    }

    /// Install `count` identical hourly candles at `price`, oldest first.
    pub fn set_flat_candles(&self, pair: Pair, price: f64, count: usize) {
        let candles = (0..count)
            .map(|i| Candle {
                timestamp: i as i64 * 3_600_000,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 100.0,
            })
            .collect();
        self.set_candles(pair, candles);
    }

    pub fn set_book(&self, pair: Pair, book: OrderBook) {
        self.books.write().insert(pair, book);
    }

    pub fn set_balance(&self, asset: &str, free: f64) {
        self.balances.write().insert(asset.to_uppercase(), free);
    }

    pub fn set_filters(&self, filters: PairFilters) {
        *self.filters.write() = filters;
    }

    /// Queue an outcome for the next `place_order` call. An empty `order_id`
    /// is replaced with a generated one.
    pub fn script_placement(&self, outcome: Result<OrderResult, ExchangeError>) {
        self.placements.write().push_back(outcome);
    }

    /// Queue states returned by successive `query_order` calls for an order.
    pub fn script_query(&self, order_id: &str, states: Vec<OrderResult>) {
        self.query_scripts
            .write()
            .entry(order_id.to_string())
            .or_default()
            .extend(states);
    }

    pub fn placed_count(&self) -> usize {
        self.placed.read().len()
    }

    fn next_order_id(&self) -> String {
        format!("MOCK-{:06}", self.order_seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Default full fill for an unscripted placement.
    fn default_fill(&self, request: &OrderRequest, order_id: &str) -> OrderResult {
        let price = self
            .tickers
            .read()
            .get(&request.pair)
            .map(|t| match request.side {
                Side::Buy => t.ask,
                Side::Sell => t.bid,
            })
            .unwrap_or(100.0);

        let (filled_base, filled_quote) = match (request.kind, request.side) {
            (OrderKind::Market, Side::Buy) => (request.size / price, request.size),
            _ => (request.size, request.size * price),
        };

        OrderResult {
            order_id: order_id.to_string(),
            status: OrderStatus::Filled,
            filled_base,
            filled_quote,
            average_price: price,
            fees: 0.0,
            exchange_raw: serde_json::json!({ "mock": true }),
        }
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError> {
        self.tickers
            .read()
            .get(pair)
            .copied()
            .ok_or_else(|| ExchangeError::NotFound(format!("no ticker for {pair}")))
    }

    async fn get_ohlcv(
        &self,
        pair: &Pair,
        _interval_minutes: u32,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let candles = self
            .candles
            .read()
            .get(pair)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("no candles for {pair}")))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn get_order_book(
        &self,
        pair: &Pair,
        _depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        Ok(self.books.read().get(pair).cloned().unwrap_or_default())
    }

    async fn get_balance(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        Ok(self.balances.read().clone())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        // Idempotence: duplicate request ids return the original result
        // without recording a second placement.
        if let Some(existing) = self.seen_requests.read().get(&request.request_id) {
            return Ok(existing.clone());
        }

        self.placed.write().push(request.clone());

        let outcome = self.placements.write().pop_front();
        let result = match outcome {
            Some(Ok(mut scripted)) => {
                if scripted.order_id.is_empty() {
                    scripted.order_id = self.next_order_id();
                }
                scripted
            }
            Some(Err(e)) => return Err(e),
            None => {
                let id = self.next_order_id();
                self.default_fill(request, &id)
            }
        };

        self.seen_requests
            .write()
            .insert(request.request_id.clone(), result.clone());
        self.last_state
            .write()
            .insert(result.order_id.clone(), result.clone());
        Ok(result)
    }

    async fn query_order(
        &self,
        order_id: &str,
        _pair: &Pair,
    ) -> Result<OrderResult, ExchangeError> {
        if let Some(next) = self
            .query_scripts
            .write()
            .get_mut(order_id)
            .and_then(VecDeque::pop_front)
        {
            self.last_state
                .write()
                .insert(order_id.to_string(), next.clone());
            return Ok(next);
        }

        self.last_state
            .read()
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id}")))
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        _pair: &Pair,
    ) -> Result<OrderResult, ExchangeError> {
        self.canceled.write().push(order_id.to_string());

        let mut states = self.last_state.write();
        let state = states
            .get_mut(order_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id}")))?;
        if !state.status.is_terminal() {
            state.status = OrderStatus::Canceled;
        }
        Ok(state.clone())
    }

    async fn get_exchange_info(&self, _pair: &Pair) -> Result<PairFilters, ExchangeError> {
        Ok(*self.filters.read())
    }

    async fn get_listed_pairs(&self, quote: &str) -> Result<Vec<Pair>, ExchangeError> {
        let quote = quote.to_uppercase();
        Ok(self
            .tickers
            .read()
            .keys()
            .filter(|p| p.quote == quote)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Pair {
        Pair::new("BTC", "AUD")
    }

    #[tokio::test]
    async fn unscripted_placement_fills_at_ticker() {
        let mock = MockExchange::with_flat_price(pair(), 50_000.0);
        let request = OrderRequest::market(pair(), Side::Buy, 200.0, "r1".into());
        let result = mock.place_order(&request).await.unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        assert!((result.filled_quote - 200.0).abs() < 1e-9);
        assert_eq!(mock.placed_count(), 1);
    }

    #[tokio::test]
    async fn scripted_query_sequence_then_last_state() {
        let mock = MockExchange::with_flat_price(pair(), 50_000.0);
        mock.script_placement(Ok(OrderResult {
            order_id: "ORD-1".into(),
            status: OrderStatus::Pending,
            filled_base: 0.0,
            filled_quote: 0.0,
            average_price: 0.0,
            fees: 0.0,
            exchange_raw: serde_json::Value::Null,
        }));

        let request = OrderRequest::limit(pair(), Side::Buy, 0.004, 49_999.0, "r1".into());
        let placed = mock.place_order(&request).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Pending);

        mock.script_query(
            "ORD-1",
            vec![OrderResult {
                order_id: "ORD-1".into(),
                status: OrderStatus::Filled,
                filled_base: 0.004,
                filled_quote: 200.0,
                average_price: 50_000.0,
                fees: 0.2,
                exchange_raw: serde_json::Value::Null,
            }],
        );

        let q1 = mock.query_order("ORD-1", &pair()).await.unwrap();
        assert_eq!(q1.status, OrderStatus::Filled);
        // Script drained — repeats last state.
        let q2 = mock.query_order("ORD-1", &pair()).await.unwrap();
        assert_eq!(q2.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn duplicate_request_id_is_deduplicated() {
        let mock = MockExchange::with_flat_price(pair(), 50_000.0);
        let request = OrderRequest::market(pair(), Side::Buy, 200.0, "same".into());
        let a = mock.place_order(&request).await.unwrap();
        let b = mock.place_order(&request).await.unwrap();
        assert_eq!(a.order_id, b.order_id);
        assert_eq!(mock.placed_count(), 1);
    }

    #[tokio::test]
    async fn cancel_preserves_partial_fill() {
        let mock = MockExchange::with_flat_price(pair(), 50_000.0);
        mock.script_placement(Ok(OrderResult {
            order_id: "ORD-9".into(),
            status: OrderStatus::Partial,
            filled_base: 0.002,
            filled_quote: 100.0,
            average_price: 50_000.0,
            fees: 0.1,
            exchange_raw: serde_json::Value::Null,
        }));
        let request = OrderRequest::limit(pair(), Side::Buy, 0.004, 50_000.0, "r1".into());
        mock.place_order(&request).await.unwrap();

        let canceled = mock.cancel_order("ORD-9", &pair()).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!((canceled.filled_base - 0.002).abs() < 1e-12);
    }
}
