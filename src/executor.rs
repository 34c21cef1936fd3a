// =============================================================================
// Executor — order state machine with fill tracking
// =============================================================================
//
//            submit
//   proposed ─────► pending ──fill──► filled
//      │               │
//      │            timeout
//      │               ▼
//      │        market_fallback ──► filled | failed
//      │
//    veto ──► rejected (handled upstream by the sentinel)
//
// Market orders treat the placement response as terminal, with a bounded
// settle wait for stragglers; limit orders rest at one tick inside the
// spread and are polled until filled or timed out, then cancelled and
// optionally chased with a market order for the remainder. TWAP splits a
// parent into k market children across a window.
//
// Sizing convention: market BUYs are quote notional; everything else is base
// quantity. Every placement carries a client request id; retries after
// transient errors reuse the same id, so a duplicate placement can never
// create a second order.
//
// Confirmed fills are applied to the ledger here, in fill-arrival order.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExecutionConfig, OrderStyle};
use crate::events::{Event, EventBus};
use crate::exchange::{
    ExchangeApi, ExchangeError, OrderKind, OrderRequest, OrderResult, OrderStatus, PairFilters,
};
use crate::ledger::{Ledger, LedgerError};
use crate::types::{Pair, Side};

/// Attempts for transient placement failures.
const PLACE_ATTEMPTS: u32 = 3;

/// Polls granted to a market order that comes back non-terminal.
const MARKET_SETTLE_POLLS: u32 = 5;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// A ledger invariant violation. The caller must escalate to an
    /// emergency stop — never swallow this.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct Executor {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<Ledger>,
    events: EventBus,
    config: ExecutionConfig,
}

impl Executor {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        ledger: Arc<Ledger>,
        events: EventBus,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            exchange,
            ledger,
            events,
            config,
        }
    }

    /// Execute a sized order using the configured style. `size` is quote
    /// notional for BUYs and base quantity for SELLs.
    pub async fn execute(
        &self,
        cycle_id: u64,
        pair: &Pair,
        side: Side,
        size: f64,
    ) -> Result<OrderResult, ExecError> {
        match self.config.order_kind {
            OrderStyle::Market => self.execute_market(cycle_id, pair, side, size).await,
            OrderStyle::Limit => self.execute_limit(cycle_id, pair, side, size).await,
            OrderStyle::Twap => self.execute_twap(cycle_id, pair, side, size).await,
        }
    }

    /// Defensive close used by the stop-loss monitor: always a market order.
    pub async fn execute_market_close(
        &self,
        cycle_id: u64,
        pair: &Pair,
        base_quantity: f64,
    ) -> Result<OrderResult, ExecError> {
        self.execute_market(cycle_id, pair, Side::Sell, base_quantity)
            .await
    }

    // -------------------------------------------------------------------------
    // Market path
    // -------------------------------------------------------------------------

    async fn execute_market(
        &self,
        cycle_id: u64,
        pair: &Pair,
        side: Side,
        size: f64,
    ) -> Result<OrderResult, ExecError> {
        let filters = self.exchange.get_exchange_info(pair).await?;
        let size = self.checked_market_size(pair, side, size, &filters).await?;

        let request = OrderRequest::market(pair.clone(), side, size, Uuid::new_v4().to_string());
        let mut result = self.place_with_retry(&request, cycle_id).await?;

        // Placement response is terminal for market orders; grant stragglers
        // a bounded settle wait, then cancel whatever remains.
        let mut polls = 0;
        while !result.status.is_terminal() && polls < MARKET_SETTLE_POLLS {
            tokio::time::sleep(Duration::from_millis(self.config.poll_ms)).await;
            result = self.exchange.query_order(&result.order_id, pair).await?;
            polls += 1;
        }
        if !result.status.is_terminal() {
            warn!(
                order_id = %result.order_id,
                pair = %pair,
                "market order still open after settle wait — cancelling remainder"
            );
            result = self.exchange.cancel_order(&result.order_id, pair).await?;
        }

        self.settle(cycle_id, pair, side, &result).await?;
        Ok(result)
    }

    /// Validate and round a market order size against the pair filters.
    async fn checked_market_size(
        &self,
        pair: &Pair,
        side: Side,
        size: f64,
        filters: &PairFilters,
    ) -> Result<f64, ExchangeError> {
        match side {
            // Quote-notional: only the minimum applies.
            Side::Buy => {
                filters.check_notional(size)?;
                Ok(size)
            }
            Side::Sell => {
                let rounded = filters.round_base_down(size);
                let price = self.exchange.get_ticker(pair).await?.bid;
                filters.check_notional(rounded * price)?;
                Ok(rounded)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Limit path
    // -------------------------------------------------------------------------

    async fn execute_limit(
        &self,
        cycle_id: u64,
        pair: &Pair,
        side: Side,
        size: f64,
    ) -> Result<OrderResult, ExecError> {
        let filters = self.exchange.get_exchange_info(pair).await?;
        let ticker = self.exchange.get_ticker(pair).await?;

        // One tick inside the spread.
        let price = match side {
            Side::Buy => filters.round_price(ticker.bid + filters.tick_size),
            Side::Sell => filters.round_price(ticker.ask - filters.tick_size),
        };

        // Limit orders are base-denominated; convert quote-sized buys.
        let base = match side {
            Side::Buy => filters.round_base_down(size / price),
            Side::Sell => filters.round_base_down(size),
        };
        filters.check_notional(base * price)?;

        let request =
            OrderRequest::limit(pair.clone(), side, base, price, Uuid::new_v4().to_string());
        let mut result = self.place_with_retry(&request, cycle_id).await?;

        // Poll until filled or the timeout elapses.
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.limit_timeout_s);
        while !result.status.is_terminal() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(self.config.poll_ms)).await;
            result = self.exchange.query_order(&result.order_id, pair).await?;
        }

        if !result.status.is_terminal() {
            info!(
                order_id = %result.order_id,
                pair = %pair,
                filled_base = result.filled_base,
                "limit order timed out — cancelling"
            );
            result = self.exchange.cancel_order(&result.order_id, pair).await?;
        }

        // Apply whatever the limit order filled.
        self.settle(cycle_id, pair, side, &result).await?;

        let remaining_base = (base - result.filled_base).max(0.0);
        if result.status == OrderStatus::Filled
            || !self.config.fallback_to_market
            || remaining_base < filters.step_size
        {
            return Ok(result);
        }

        // Chase the remainder with a market order.
        let remainder_size = match side {
            Side::Buy => size - result.filled_quote,
            Side::Sell => remaining_base,
        };
        debug!(
            pair = %pair,
            remainder = remainder_size,
            "falling back to market for unfilled remainder"
        );

        let market = self
            .execute_market(cycle_id, pair, side, remainder_size)
            .await?;

        Ok(merge_results(&result, &market))
    }

    // -------------------------------------------------------------------------
    // TWAP path
    // -------------------------------------------------------------------------

    async fn execute_twap(
        &self,
        cycle_id: u64,
        pair: &Pair,
        side: Side,
        size: f64,
    ) -> Result<OrderResult, ExecError> {
        let slices = self.config.twap_slices.max(1);
        let child_size = size / slices as f64;
        let pause = Duration::from_secs(self.config.twap_window_s) / slices;

        info!(
            pair = %pair,
            side = %side,
            slices,
            child_size,
            "TWAP parent started"
        );

        let mut aggregate: Option<OrderResult> = None;
        for slice in 0..slices {
            if slice > 0 {
                tokio::time::sleep(pause).await;
            }
            match self.execute_market(cycle_id, pair, side, child_size).await {
                Ok(child) => {
                    aggregate = Some(match &aggregate {
                        Some(prev) => merge_results(prev, &child),
                        None => child,
                    });
                }
                Err(ExecError::Ledger(e)) => return Err(ExecError::Ledger(e)),
                Err(ExecError::Exchange(e)) => {
                    warn!(pair = %pair, slice, error = %e, "TWAP child failed");
                    // Remaining children are abandoned; the parent reports
                    // what actually filled.
                    break;
                }
            }
        }

        let mut parent = aggregate
            .unwrap_or_else(|| OrderResult::failed(format!("TWAP-{}", Uuid::new_v4())));

        // Parent is FILLED when children sum to the request within step
        // tolerance (quote tolerance approximated via the average price).
        let filters = self.exchange.get_exchange_info(pair).await?;
        let requested_base = match side {
            Side::Buy => {
                if parent.average_price > 0.0 {
                    size / parent.average_price
                } else {
                    0.0
                }
            }
            Side::Sell => size,
        };
        if parent.filled_base > 0.0 {
            parent.status = if (requested_base - parent.filled_base).abs() <= filters.step_size {
                OrderStatus::Filled
            } else {
                OrderStatus::Partial
            };
        }

        info!(
            pair = %pair,
            status = %parent.status,
            filled_base = parent.filled_base,
            "TWAP parent finished"
        );
        Ok(parent)
    }

    // -------------------------------------------------------------------------
    // Shared plumbing
    // -------------------------------------------------------------------------

    /// Place an order, retrying transient failures with the same request id.
    /// Adapters deduplicate on request id, so a retry can never double-place.
    async fn place_with_retry(
        &self,
        request: &OrderRequest,
        cycle_id: u64,
    ) -> Result<OrderResult, ExchangeError> {
        let mut backoff = Duration::from_millis(200);
        let mut last_err = None;

        for attempt in 1..=PLACE_ATTEMPTS {
            match self.exchange.place_order(request).await {
                Ok(result) => {
                    self.events.publish(Event::OrderPlaced {
                        cycle_id,
                        pair: request.pair.clone(),
                        side: request.side,
                        kind: request.kind,
                        order_id: result.order_id.clone(),
                        size: request.size,
                    });
                    return Ok(result);
                }
                Err(e) if e.is_transient() && attempt < PLACE_ATTEMPTS => {
                    warn!(
                        pair = %request.pair,
                        attempt,
                        error = %e,
                        "transient placement failure — retrying with same request id"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| ExchangeError::Unknown("placement retries exhausted".into())))
    }

    /// Apply a confirmed fill to the ledger and emit the fill event.
    async fn settle(
        &self,
        cycle_id: u64,
        pair: &Pair,
        side: Side,
        result: &OrderResult,
    ) -> Result<(), ExecError> {
        if result.filled_base <= 0.0 {
            return Ok(());
        }
        self.ledger.apply_fill(pair, side, result)?;
        self.events.publish(Event::OrderFilled {
            cycle_id,
            pair: pair.clone(),
            side,
            result: result.clone(),
        });
        Ok(())
    }
}

/// Merge two partial results of the same parent into one normalized result.
fn merge_results(a: &OrderResult, b: &OrderResult) -> OrderResult {
    let filled_base = a.filled_base + b.filled_base;
    let filled_quote = a.filled_quote + b.filled_quote;
    let average_price = if filled_base > 0.0 {
        filled_quote / filled_base
    } else {
        0.0
    };

    let status = match (a.status, b.status) {
        (OrderStatus::Filled, OrderStatus::Filled) => OrderStatus::Filled,
        _ if b.status == OrderStatus::Filled && a.filled_base == 0.0 => OrderStatus::Filled,
        _ if filled_base > 0.0 => {
            // Cancelled leg plus a filled chase still means the parent
            // delivered; report Filled only when the chase leg completed.
            if b.status == OrderStatus::Filled {
                OrderStatus::Filled
            } else {
                OrderStatus::Partial
            }
        }
        _ => OrderStatus::Failed,
    };

    OrderResult {
        order_id: a.order_id.clone(),
        status,
        filled_base,
        filled_quote,
        average_price,
        fees: a.fees + b.fees,
        exchange_raw: serde_json::Value::Null,
    }
}
