// =============================================================================
// Simulated Exchange — live market data, synthetic fills
// =============================================================================
//
// Market data comes from an optional inner adapter (typically the real client
// in read-only use); without one, a smooth deterministic price walk stands in
// so the engine still runs fully offline. Fills are synthesized against
// simulated balances with a flat taker fee, honoring the same filters the
// real adapter would enforce.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::market_data::Candle;
use crate::types::{Pair, Side};

use super::{
    BookLevel, ExchangeApi, ExchangeError, OrderBook, OrderKind, OrderRequest, OrderResult,
    OrderStatus, PairFilters, Ticker,
};

/// Flat taker fee applied to every synthetic fill.
const SIM_FEE_RATE: f64 = 0.0026;

/// Half-spread applied around the synthetic mid price.
const SIM_HALF_SPREAD: f64 = 0.0005;

struct SimOrder {
    request: OrderRequest,
    state: OrderResult,
}

/// Simulation adapter implementing the [`ExchangeApi`] capability.
pub struct SimulatedExchange {
    quote_currency: String,
    balances: RwLock<HashMap<String, f64>>,
    orders: RwLock<HashMap<String, SimOrder>>,
    /// request_id -> order_id, for placement idempotence.
    seen_requests: RwLock<HashMap<String, String>>,
    data_source: Option<Arc<dyn ExchangeApi>>,
    filters: PairFilters,
    order_seq: AtomicU64,
}

impl SimulatedExchange {
    pub fn new(
        quote_currency: impl Into<String>,
        initial_capital: f64,
        data_source: Option<Arc<dyn ExchangeApi>>,
    ) -> Self {
        let quote_currency = quote_currency.into().to_uppercase();
        let mut balances = HashMap::new();
        balances.insert(quote_currency.clone(), initial_capital);

        info!(
            quote = %quote_currency,
            initial_capital,
            live_data = data_source.is_some(),
            "simulated exchange initialised"
        );

        Self {
            quote_currency,
            balances: RwLock::new(balances),
            orders: RwLock::new(HashMap::new()),
            seen_requests: RwLock::new(HashMap::new()),
            data_source,
            filters: PairFilters {
                step_size: 1e-6,
                tick_size: 0.01,
                min_notional: 10.0,
            },
            order_seq: AtomicU64::new(1),
        }
    }

    // -------------------------------------------------------------------------
    // Synthetic price walk
    // -------------------------------------------------------------------------

    /// Anchor price per base asset, derived from the asset name so distinct
    /// pairs get distinct but stable price scales.
    fn anchor_price(base: &str) -> f64 {
        let seed: u64 = base.bytes().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u64)
        });
        // Spread anchors across a few orders of magnitude.
        let magnitude = 1 + (seed % 5) as i32; // 10 .. 100_000
        10f64.powi(magnitude) * (1.0 + (seed % 89) as f64 / 100.0)
    }

    /// Smooth deterministic mid price at a given minute index.
    fn synthetic_mid(base: &str, minute: i64) -> f64 {
        let anchor = Self::anchor_price(base);
        let t = minute as f64;
        anchor * (1.0 + 0.012 * (t / 37.0).sin() + 0.004 * (t / 7.3).sin())
    }

    fn synthetic_ticker(&self, pair: &Pair) -> Ticker {
        let minute = chrono::Utc::now().timestamp() / 60;
        let mid = Self::synthetic_mid(&pair.base, minute);
        let day: Vec<f64> = (0..24)
            .map(|h| Self::synthetic_mid(&pair.base, minute - h * 60))
            .collect();
        Ticker {
            price: mid,
            bid: mid * (1.0 - SIM_HALF_SPREAD),
            ask: mid * (1.0 + SIM_HALF_SPREAD),
            high_24h: day.iter().fold(f64::MIN, |a, &b| a.max(b)),
            low_24h: day.iter().fold(f64::MAX, |a, &b| a.min(b)),
            volume_24h: Self::anchor_price(&pair.base) * 10.0,
        }
    }

    async fn ticker_for(&self, pair: &Pair) -> Result<Ticker, ExchangeError> {
        if let Some(source) = &self.data_source {
            match source.get_ticker(pair).await {
                Ok(t) => return Ok(t),
                Err(e) => warn!(pair = %pair, error = %e, "live ticker failed — using synthetic"),
            }
        }
        Ok(self.synthetic_ticker(pair))
    }

    // -------------------------------------------------------------------------
    // Fill synthesis
    // -------------------------------------------------------------------------

    /// Fill an order at `price` and settle simulated balances.
    fn settle_fill(
        &self,
        request: &OrderRequest,
        order_id: &str,
        price: f64,
    ) -> Result<OrderResult, ExchangeError> {
        let (filled_base, filled_quote) = match (request.kind, request.side) {
            // Market BUY size is quote notional.
            (OrderKind::Market, Side::Buy) => (request.size / price, request.size),
            _ => (request.size, request.size * price),
        };
        let filled_base = self.filters.round_base_down(filled_base);
        let filled_quote = filled_base * price;
        self.filters.check_notional(filled_quote)?;

        let fees = filled_quote * SIM_FEE_RATE;
        let mut balances = self.balances.write();

        match request.side {
            Side::Buy => {
                let need = filled_quote + fees;
                let quote = balances.entry(self.quote_currency.clone()).or_insert(0.0);
                if *quote < need {
                    return Err(ExchangeError::FilterRejected(format!(
                        "insufficient {} balance: have {:.2}, need {:.2}",
                        self.quote_currency, *quote, need
                    )));
                }
                *quote -= need;
                *balances.entry(request.pair.base.clone()).or_insert(0.0) += filled_base;
            }
            Side::Sell => {
                let held = balances.entry(request.pair.base.clone()).or_insert(0.0);
                if *held + 1e-12 < filled_base {
                    return Err(ExchangeError::FilterRejected(format!(
                        "insufficient {} balance: have {:.8}, need {:.8}",
                        request.pair.base, *held, filled_base
                    )));
                }
                *held -= filled_base;
                *balances.entry(self.quote_currency.clone()).or_insert(0.0) +=
                    filled_quote - fees;
            }
        }

        debug!(
            order_id,
            pair = %request.pair,
            side = %request.side,
            price,
            filled_base,
            filled_quote,
            fees,
            "synthetic fill settled"
        );

        Ok(OrderResult {
            order_id: order_id.to_string(),
            status: OrderStatus::Filled,
            filled_base,
            filled_quote,
            average_price: price,
            fees,
            exchange_raw: serde_json::json!({ "simulated": true }),
        })
    }

    /// Re-check a resting limit order against the current ticker and fill it
    /// if the market has crossed its price.
    async fn refresh_resting(&self, order_id: &str) -> Result<(), ExchangeError> {
        let request = {
            let orders = self.orders.read();
            let order = orders
                .get(order_id)
                .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id}")))?;
            if order.state.status != OrderStatus::Pending {
                return Ok(());
            }
            order.request.clone()
        };

        let ticker = self.ticker_for(&request.pair).await?;
        let limit = request.price.unwrap_or(0.0);
        let crossed = match request.side {
            Side::Buy => ticker.ask <= limit,
            Side::Sell => ticker.bid >= limit,
        };

        if crossed {
            let fill = self.settle_fill(&request, order_id, limit)?;
            if let Some(order) = self.orders.write().get_mut(order_id) {
                order.state = fill;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeApi for SimulatedExchange {
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError> {
        self.ticker_for(pair).await
    }

    async fn get_ohlcv(
        &self,
        pair: &Pair,
        interval_minutes: u32,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        if let Some(source) = &self.data_source {
            match source.get_ohlcv(pair, interval_minutes, limit).await {
                Ok(candles) => return Ok(candles),
                Err(e) => warn!(pair = %pair, error = %e, "live OHLC failed — using synthetic"),
            }
        }

        let now_minute = chrono::Utc::now().timestamp() / 60;
        let step = interval_minutes as i64;
        let mut candles = Vec::with_capacity(limit);
        for i in (0..limit as i64).rev() {
            let minute = now_minute - i * step;
            let open = Self::synthetic_mid(&pair.base, minute - step);
            let close = Self::synthetic_mid(&pair.base, minute);
            let mid = Self::synthetic_mid(&pair.base, minute - step / 2);
            candles.push(Candle {
                timestamp: minute * 60_000,
                open,
                high: open.max(close).max(mid) * 1.001,
                low: open.min(close).min(mid) * 0.999,
                close,
                volume: Self::anchor_price(&pair.base),
            });
        }
        Ok(candles)
    }

    async fn get_order_book(
        &self,
        pair: &Pair,
        depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        if let Some(source) = &self.data_source {
            match source.get_order_book(pair, depth).await {
                Ok(book) => return Ok(book),
                Err(e) => warn!(pair = %pair, error = %e, "live depth failed — using synthetic"),
            }
        }

        let ticker = self.synthetic_ticker(pair);
        let level_qty = 1000.0 / ticker.price.max(1e-9);
        let mut bids = Vec::with_capacity(depth);
        let mut asks = Vec::with_capacity(depth);
        for i in 0..depth {
            let offset = (i as f64 + 1.0) * SIM_HALF_SPREAD;
            bids.push(BookLevel {
                price: ticker.price * (1.0 - offset),
                quantity: level_qty,
            });
            asks.push(BookLevel {
                price: ticker.price * (1.0 + offset),
                quantity: level_qty,
            });
        }
        Ok(OrderBook { bids, asks })
    }

    async fn get_balance(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        Ok(self.balances.read().clone())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        // Idempotence: a request id already accepted returns its order state
        // instead of creating a second order.
        if let Some(existing_id) = self.seen_requests.read().get(&request.request_id) {
            let orders = self.orders.read();
            if let Some(order) = orders.get(existing_id) {
                debug!(request_id = %request.request_id, "duplicate request id — returning existing order");
                return Ok(order.state.clone());
            }
        }

        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);
        let order_id = format!("SIM-{seq:08}");
        let ticker = self.ticker_for(&request.pair).await?;

        let state = match request.kind {
            OrderKind::Market => {
                let price = match request.side {
                    Side::Buy => ticker.ask,
                    Side::Sell => ticker.bid,
                };
                self.settle_fill(request, &order_id, self.filters.round_price(price))?
            }
            OrderKind::Limit => {
                let limit = request
                    .price
                    .ok_or_else(|| {
                        ExchangeError::FilterRejected("limit order without price".into())
                    })
                    .map(|p| self.filters.round_price(p))?;
                self.filters.check_notional(request.size * limit)?;

                let crossed = match request.side {
                    Side::Buy => ticker.ask <= limit,
                    Side::Sell => ticker.bid >= limit,
                };
                if crossed {
                    self.settle_fill(request, &order_id, limit)?
                } else {
                    OrderResult {
                        order_id: order_id.clone(),
                        status: OrderStatus::Pending,
                        filled_base: 0.0,
                        filled_quote: 0.0,
                        average_price: 0.0,
                        fees: 0.0,
                        exchange_raw: serde_json::json!({ "simulated": true }),
                    }
                }
            }
        };

        self.seen_requests
            .write()
            .insert(request.request_id.clone(), order_id.clone());
        self.orders.write().insert(
            order_id.clone(),
            SimOrder {
                request: request.clone(),
                state: state.clone(),
            },
        );

        Ok(state)
    }

    async fn query_order(
        &self,
        order_id: &str,
        _pair: &Pair,
    ) -> Result<OrderResult, ExchangeError> {
        self.refresh_resting(order_id).await?;
        self.orders
            .read()
            .get(order_id)
            .map(|o| o.state.clone())
            .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id}")))
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        _pair: &Pair,
    ) -> Result<OrderResult, ExchangeError> {
        let mut orders = self.orders.write();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id}")))?;

        if !order.state.status.is_terminal() {
            order.state.status = OrderStatus::Canceled;
        }
        Ok(order.state.clone())
    }

    async fn get_exchange_info(&self, _pair: &Pair) -> Result<PairFilters, ExchangeError> {
        Ok(self.filters)
    }

    async fn get_listed_pairs(&self, quote: &str) -> Result<Vec<Pair>, ExchangeError> {
        if let Some(source) = &self.data_source {
            if let Ok(pairs) = source.get_listed_pairs(quote).await {
                return Ok(pairs);
            }
        }
        Ok(["BTC", "ETH", "SOL", "XRP"]
            .iter()
            .map(|base| Pair::new(*base, quote))
            .collect())
    }
}
