// =============================================================================
// Analysts — independent directional signal producers
// =============================================================================
//
// Every analyst satisfies one capability: evaluate a pair's market data plus
// the cycle context and emit a `Signal`. Analysts hold no mutable state
// beyond bounded caches, so they can run concurrently; the fan-out runner
// joins them with a per-analyst timeout and drops failures instead of
// failing the cycle.
//
// Adding an analyst means registering a new implementation here and seeding
// a weight row for it in the fusion engine.
// =============================================================================

pub mod macro_econ;
pub mod onchain;
pub mod orderbook;
pub mod sentiment;
pub mod technical;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Stage;
use crate::market_data::MarketData;
use crate::types::Pair;

pub use macro_econ::MacroAnalyst;
pub use onchain::OnchainAnalyst;
pub use orderbook::OrderBookAnalyst;
pub use sentiment::SentimentAnalyst;
pub use technical::TechnicalAnalyst;

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A directional opinion with self-assessed reliability from one analyst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub source: String,
    pub pair: Pair,
    /// Bull/bear sign, magnitude = strength. Clamped to [-1, 1].
    pub direction: f64,
    /// Self-assessed reliability in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Signal {
    pub fn new(
        source: &str,
        pair: &Pair,
        direction: f64,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            source: source.to_string(),
            pair: pair.clone(),
            direction: direction.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    /// A zero-confidence signal: the analyst declines to take a view rather
    /// than fabricate one.
    pub fn abstain(source: &str, pair: &Pair, reasoning: impl Into<String>) -> Self {
        Self::new(source, pair, 0.0, 0.0, reasoning)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// External feeds
// ---------------------------------------------------------------------------

/// Fear & Greed index reading (0 = extreme fear, 100 = extreme greed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FearGreedReading {
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
}

/// A scored news headline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    /// Polarity in [-1, 1].
    pub polarity: f64,
    pub published_at: DateTime<Utc>,
}

/// On-chain accumulation/distribution score in [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainReading {
    pub netflow_score: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Macro risk-appetite bias in [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroReading {
    pub bias: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Snapshot of all external feeds at cycle start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub fear_greed: Option<FearGreedReading>,
    pub headlines: Vec<Headline>,
    pub onchain: Option<OnchainReading>,
    pub macro_bias: Option<MacroReading>,
}

/// Shared store the outer process pushes third-party readings into. The core
/// only ever reads snapshots from it.
#[derive(Default)]
pub struct FeedStore {
    inner: RwLock<FeedSnapshot>,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fear_greed(&self, value: f64) {
        self.inner.write().fear_greed = Some(FearGreedReading {
            value: value.clamp(0.0, 100.0),
            fetched_at: Utc::now(),
        });
    }

    pub fn set_headlines(&self, headlines: Vec<Headline>) {
        self.inner.write().headlines = headlines;
    }

    pub fn set_onchain(&self, netflow_score: f64) {
        self.inner.write().onchain = Some(OnchainReading {
            netflow_score: netflow_score.clamp(-1.0, 1.0),
            fetched_at: Utc::now(),
        });
    }

    pub fn set_macro_bias(&self, bias: f64) {
        self.inner.write().macro_bias = Some(MacroReading {
            bias: bias.clamp(-1.0, 1.0),
            fetched_at: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.read().clone()
    }
}

// ---------------------------------------------------------------------------
// Cycle context
// ---------------------------------------------------------------------------

/// Read-only context shared by every analyst within one cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub feeds: FeedSnapshot,
    /// Readings older than this are stale.
    pub stale_after: chrono::Duration,
    /// Headline blend weight for the sentiment analyst.
    pub news_weight: f64,
    pub now: DateTime<Utc>,
}

impl CycleContext {
    pub fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
        self.now - fetched_at > self.stale_after
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// The single capability all analysts satisfy.
#[async_trait]
pub trait Analyst: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn evaluate(
        &self,
        pair: &Pair,
        market: &MarketData,
        ctx: &CycleContext,
    ) -> Result<Signal>;
}

/// The analyst roster for a rollout stage.
pub fn analyst_set(stage: Stage) -> Vec<Arc<dyn Analyst>> {
    let mut set: Vec<Arc<dyn Analyst>> = vec![
        Arc::new(TechnicalAnalyst::new()),
        Arc::new(SentimentAnalyst::new()),
    ];
    if matches!(stage, Stage::Stage2 | Stage::Stage3) {
        set.push(Arc::new(OrderBookAnalyst::new()));
    }
    if matches!(stage, Stage::Stage3) {
        set.push(Arc::new(OnchainAnalyst::new()));
        set.push(Arc::new(MacroAnalyst::new()));
    }
    set
}

/// Run all analysts concurrently with a per-analyst timeout. Failures and
/// timeouts degrade to a dropped signal — never a cycle failure.
pub async fn run_analysts(
    analysts: &[Arc<dyn Analyst>],
    pair: &Pair,
    market: &MarketData,
    ctx: &CycleContext,
    timeout: Duration,
) -> Vec<Signal> {
    let futures = analysts.iter().map(|analyst| {
        let analyst = analyst.clone();
        async move {
            let name = analyst.source_name();
            match tokio::time::timeout(timeout, analyst.evaluate(pair, market, ctx)).await {
                Ok(Ok(signal)) => Some(signal),
                Ok(Err(e)) => {
                    warn!(analyst = name, pair = %pair, error = %e, "analyst failed");
                    None
                }
                Err(_) => {
                    warn!(analyst = name, pair = %pair, "analyst timed out");
                    None
                }
            }
        }
    });

    futures_util::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderBook, Ticker};

    pub(crate) fn test_market(pair: &Pair, price: f64) -> MarketData {
        MarketData {
            pair: pair.clone(),
            ticker: Ticker {
                price,
                bid: price * 0.999,
                ask: price * 1.001,
                high_24h: price * 1.02,
                low_24h: price * 0.98,
                volume_24h: 1000.0,
            },
            candles: Vec::new(),
            order_book: OrderBook::default(),
            fetched_at: Utc::now(),
        }
    }

    pub(crate) fn test_context() -> CycleContext {
        CycleContext {
            feeds: FeedSnapshot::default(),
            stale_after: chrono::Duration::minutes(120),
            news_weight: 0.5,
            now: Utc::now(),
        }
    }

    #[test]
    fn signal_clamps_ranges() {
        let pair = Pair::new("BTC", "AUD");
        let s = Signal::new("test", &pair, 3.0, -0.5, "r");
        assert!((s.direction - 1.0).abs() < f64::EPSILON);
        assert!(s.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn stage_selects_analyst_roster() {
        assert_eq!(analyst_set(Stage::Stage1).len(), 2);
        assert_eq!(analyst_set(Stage::Stage2).len(), 3);
        assert_eq!(analyst_set(Stage::Stage3).len(), 5);
    }

    #[test]
    fn staleness_check() {
        let ctx = test_context();
        assert!(!ctx.is_stale(Utc::now()));
        assert!(ctx.is_stale(Utc::now() - chrono::Duration::hours(3)));
    }

    #[tokio::test]
    async fn fan_out_drops_failures() {
        struct Failing;
        #[async_trait]
        impl Analyst for Failing {
            fn source_name(&self) -> &'static str {
                "failing"
            }
            async fn evaluate(
                &self,
                _pair: &Pair,
                _market: &MarketData,
                _ctx: &CycleContext,
            ) -> Result<Signal> {
                anyhow::bail!("feed unavailable")
            }
        }

        let pair = Pair::new("BTC", "AUD");
        let market = test_market(&pair, 50_000.0);
        let ctx = test_context();
        let analysts: Vec<Arc<dyn Analyst>> =
            vec![Arc::new(Failing), Arc::new(OrderBookAnalyst::new())];

        let signals =
            run_analysts(&analysts, &pair, &market, &ctx, Duration::from_secs(1)).await;
        // The failing analyst is dropped; the order-book analyst abstains on
        // an empty book but still returns a signal.
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].source, "orderbook");
    }
}
