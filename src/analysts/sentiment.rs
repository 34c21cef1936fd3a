// =============================================================================
// Sentiment Analyst — contrarian Fear & Greed with headline blending
// =============================================================================
//
// Contrarian by default: extreme fear reads bullish, extreme greed bearish.
//   fg_direction = (50 - fg_value) / 50
// Headline polarity (when present) is blended in at `news_weight`; headlines
// follow the crowd, so they enter with their own sign, not inverted.
//
// Confidence is proportional to |fg_value - 50| / 50. A stale or missing
// index reading abstains rather than fabricating a view.
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;

use crate::market_data::MarketData;
use crate::types::Pair;

use super::{Analyst, CycleContext, Signal};

pub struct SentimentAnalyst;

impl SentimentAnalyst {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SentimentAnalyst {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyst for SentimentAnalyst {
    fn source_name(&self) -> &'static str {
        "sentiment"
    }

    async fn evaluate(
        &self,
        pair: &Pair,
        _market: &MarketData,
        ctx: &CycleContext,
    ) -> Result<Signal> {
        let Some(fg) = &ctx.feeds.fear_greed else {
            return Ok(Signal::abstain(
                self.source_name(),
                pair,
                "no fear/greed reading available",
            ));
        };
        if ctx.is_stale(fg.fetched_at) {
            return Ok(Signal::abstain(
                self.source_name(),
                pair,
                format!("fear/greed reading stale (fetched {})", fg.fetched_at),
            ));
        }

        let fg_direction = (50.0 - fg.value) / 50.0;

        // Average polarity of fresh headlines, if any.
        let fresh: Vec<&super::Headline> = ctx
            .feeds
            .headlines
            .iter()
            .filter(|h| !ctx.is_stale(h.published_at))
            .collect();
        let (direction, blended) = if fresh.is_empty() {
            (fg_direction, false)
        } else {
            let polarity: f64 =
                fresh.iter().map(|h| h.polarity).sum::<f64>() / fresh.len() as f64;
            let w = ctx.news_weight.clamp(0.0, 1.0);
            ((1.0 - w) * fg_direction + w * polarity, true)
        };

        let confidence = (fg.value - 50.0).abs() / 50.0;

        let reasoning = format!(
            "fear/greed={:.0} (contrarian {:+.2}){}",
            fg.value,
            fg_direction,
            if blended {
                format!(", {} headlines blended", fresh.len())
            } else {
                String::new()
            }
        );

        Ok(
            Signal::new(self.source_name(), pair, direction, confidence, reasoning)
                .with_metadata(serde_json::json!({
                    "fear_greed": fg.value,
                    "headline_count": fresh.len(),
                })),
        )
    }
}
