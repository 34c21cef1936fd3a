// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies a pair's recent candle window into one of four regimes. The
// rules are evaluated top-to-bottom; first match wins; all inequalities are
// strict (ADX of exactly 25 is non-trending):
//
//   1. TRENDING_UP    — ADX > 25 and +DI > -DI
//   2. TRENDING_DOWN  — ADX > 25 and -DI > +DI
//   3. VOLATILE       — ATR / price > 0.05
//   4. RANGING        — otherwise
//
// Classification is deterministic for identical inputs. Results are cached
// per pair with a TTL of one cycle interval.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::{calculate_adx, calculate_atr_pct};
use crate::market_data::Candle;
use crate::types::Pair;

/// ADX above this (strictly) indicates a trend.
const ADX_TREND_THRESHOLD: f64 = 25.0;

/// ATR/price above this (strictly) indicates a volatile market.
const ATR_VOLATILE_THRESHOLD: f64 = 0.05;

/// Indicator look-back period.
const PERIOD: usize = 14;

/// High-level market regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
}

impl Regime {
    /// Canonical name, used for weight lookups and persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrendingUp => "TRENDING_UP",
            Self::TrendingDown => "TRENDING_DOWN",
            Self::Ranging => "RANGING",
            Self::Volatile => "VOLATILE",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "TRENDING_UP" => Some(Self::TrendingUp),
            "TRENDING_DOWN" => Some(Self::TrendingDown),
            "RANGING" => Some(Self::Ranging),
            "VOLATILE" => Some(Self::Volatile),
            _ => None,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A regime classification plus the metrics behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: Regime,
    pub confidence: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub atr_pct: f64,
    /// Candle count the classification was measured over.
    pub window: usize,
}

/// Thread-safe detector with a per-pair TTL cache.
pub struct RegimeDetector {
    ttl: Duration,
    cache: RwLock<HashMap<Pair, (Instant, RegimeReading)>>,
}

impl RegimeDetector {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Classify the pair from its candle window, consulting the cache first.
    pub fn classify(&self, pair: &Pair, candles: &[Candle]) -> RegimeReading {
        if let Some((at, reading)) = self.cache.read().get(pair) {
            if at.elapsed() < self.ttl {
                return reading.clone();
            }
        }

        let reading = classify_window(candles);

        debug!(
            pair = %pair,
            regime = %reading.regime,
            adx = format!("{:.2}", reading.adx),
            plus_di = format!("{:.2}", reading.plus_di),
            minus_di = format!("{:.2}", reading.minus_di),
            atr_pct = format!("{:.4}", reading.atr_pct),
            confidence = format!("{:.2}", reading.confidence),
            "regime classified"
        );

        self.cache
            .write()
            .insert(pair.clone(), (Instant::now(), reading.clone()));
        reading
    }

    /// Most recent cached reading, without recomputation.
    pub fn current(&self, pair: &Pair) -> Option<RegimeReading> {
        self.cache.read().get(pair).map(|(_, r)| r.clone())
    }
}

// =============================================================================
// Classification logic
// =============================================================================

/// Pure classification over a candle window (oldest first). With insufficient
/// data the result degrades to RANGING at zero confidence.
pub fn classify_window(candles: &[Candle]) -> RegimeReading {
    let window = candles.len();

    let adx_reading = calculate_adx(candles, PERIOD);
    let atr_pct = calculate_atr_pct(candles, PERIOD).unwrap_or(0.0);

    let (adx, plus_di, minus_di) = match adx_reading {
        Some(r) => (r.adx, r.plus_di, r.minus_di),
        None => {
            return RegimeReading {
                regime: Regime::Ranging,
                confidence: 0.0,
                adx: 0.0,
                plus_di: 0.0,
                minus_di: 0.0,
                atr_pct,
                window,
            }
        }
    };

    let (regime, confidence) = classify_metrics(adx, plus_di, minus_di, atr_pct);

    RegimeReading {
        regime,
        confidence,
        adx,
        plus_di,
        minus_di,
        atr_pct,
        window,
    }
}

/// Rule evaluation over the raw metrics. Strict inequalities throughout.
fn classify_metrics(adx: f64, plus_di: f64, minus_di: f64, atr_pct: f64) -> (Regime, f64) {
    if adx > ADX_TREND_THRESHOLD && plus_di > minus_di {
        (Regime::TrendingUp, remap(adx, 25.0, 50.0, 0.60, 1.0))
    } else if adx > ADX_TREND_THRESHOLD && minus_di > plus_di {
        (Regime::TrendingDown, remap(adx, 25.0, 50.0, 0.60, 1.0))
    } else if atr_pct > ATR_VOLATILE_THRESHOLD {
        (Regime::Volatile, remap(atr_pct, 0.05, 0.15, 0.60, 1.0))
    } else {
        // Confidence grows as ADX falls away from the trend threshold.
        (Regime::Ranging, remap(adx, 25.0, 5.0, 0.40, 0.90))
    }
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`,
/// clamped to the output range. Works with inverted input ranges.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    out_lo + t.clamp(0.0, 1.0) * (out_hi - out_lo)
}
