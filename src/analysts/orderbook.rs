// =============================================================================
// Order-book Analyst — top-of-book depth imbalance
// =============================================================================
//
//   direction = (bid_depth - ask_depth) / (bid_depth + ask_depth)
//
// computed within the top N levels. An empty book abstains.
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;

use crate::market_data::MarketData;
use crate::types::{Pair, Side};

use super::{Analyst, CycleContext, Signal};

/// Book levels considered per side.
const DEPTH_LEVELS: usize = 10;

pub struct OrderBookAnalyst;

impl OrderBookAnalyst {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrderBookAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyst for OrderBookAnalyst {
    fn source_name(&self) -> &'static str {
        "orderbook"
    }

    async fn evaluate(
        &self,
        pair: &Pair,
        market: &MarketData,
        _ctx: &CycleContext,
    ) -> Result<Signal> {
        let bid_depth = market.order_book.depth(Side::Buy, DEPTH_LEVELS);
        let ask_depth = market.order_book.depth(Side::Sell, DEPTH_LEVELS);
        let total = bid_depth + ask_depth;

        if total <= 0.0 {
            return Ok(Signal::abstain(
                self.source_name(),
                pair,
                "order book empty",
            ));
        }

        let imbalance = (bid_depth - ask_depth) / total;
        let confidence = imbalance.abs();

        let reasoning = format!(
            "top-{DEPTH_LEVELS} depth: bids={bid_depth:.4} asks={ask_depth:.4} imbalance={imbalance:+.3}"
        );

        Ok(
            Signal::new(self.source_name(), pair, imbalance, confidence, reasoning)
                .with_metadata(serde_json::json!({
                    "bid_depth": bid_depth,
                    "ask_depth": ask_depth,
                })),
        )
    }
}
