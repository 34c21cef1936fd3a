// =============================================================================
// On-chain Analyst — exchange netflow accumulation score
// =============================================================================
//
// Consumes the external on-chain feed (netflow score in [-1, 1]; positive
// means coins leaving exchanges, historically accumulation). A stale or
// missing reading abstains with confidence 0.
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;

use crate::market_data::MarketData;
use crate::types::Pair;

use super::{Analyst, CycleContext, Signal};

pub struct OnchainAnalyst;

impl OnchainAnalyst {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OnchainAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyst for OnchainAnalyst {
    fn source_name(&self) -> &'static str {
        "onchain"
    }

    async fn evaluate(
        &self,
        pair: &Pair,
        _market: &MarketData,
        ctx: &CycleContext,
    ) -> Result<Signal> {
        let Some(reading) = &ctx.feeds.onchain else {
            return Ok(Signal::abstain(
                self.source_name(),
                pair,
                "no on-chain reading available",
            ));
        };
        if ctx.is_stale(reading.fetched_at) {
            return Ok(Signal::abstain(
                self.source_name(),
                pair,
                format!("on-chain reading stale (fetched {})", reading.fetched_at),
            ));
        }

        let direction = reading.netflow_score;
        let confidence = direction.abs();

        Ok(Signal::new(
            self.source_name(),
            pair,
            direction,
            confidence,
            format!("netflow score {direction:+.2}"),
        ))
    }
}
