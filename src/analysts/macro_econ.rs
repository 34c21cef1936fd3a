// =============================================================================
// Macro Analyst — external risk-appetite bias
// =============================================================================
//
// Consumes the external macro feed (bias in [-1, 1], risk-on positive).
// Macro signals are slow and broad, so confidence is discounted relative to
// the raw bias. Stale or missing readings abstain.
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;

use crate::market_data::MarketData;
use crate::types::Pair;

use super::{Analyst, CycleContext, Signal};

/// Macro conviction discount.
const CONFIDENCE_SCALE: f64 = 0.8;

pub struct MacroAnalyst;

impl MacroAnalyst {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacroAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyst for MacroAnalyst {
    fn source_name(&self) -> &'static str {
        "macro"
    }

    async fn evaluate(
        &self,
        pair: &Pair,
        _market: &MarketData,
        ctx: &CycleContext,
    ) -> Result<Signal> {
        let Some(reading) = &ctx.feeds.macro_bias else {
            return Ok(Signal::abstain(
                self.source_name(),
                pair,
                "no macro reading available",
            ));
        };
        if ctx.is_stale(reading.fetched_at) {
            return Ok(Signal::abstain(
                self.source_name(),
                pair,
                format!("macro reading stale (fetched {})", reading.fetched_at),
            ));
        }

        let direction = reading.bias;
        let confidence = direction.abs() * CONFIDENCE_SCALE;

        Ok(Signal::new(
            self.source_name(),
            pair,
            direction,
            confidence,
            format!("macro bias {direction:+.2}"),
        ))
    }
}
