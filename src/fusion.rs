// =============================================================================
// Fusion Engine — regime-aware weighted signal combination
// =============================================================================
//
// For one pair's signals under the current regime:
//   1. Look up weights by (analyst, regime), falling back to the default row.
//   2. Drop signals whose analyst abstained (confidence 0).
//   3. Renormalize the surviving weights to sum to 1.
//   4. fused_direction  = Σ wᵢ · dᵢ
//   5. disagreement     = weighted std-dev of directions, clamped to [0, 1]
//   6. fused_confidence = Σ wᵢ · cᵢ · (1 - disagreement · penalty_factor)
//
// A single surviving signal passes through unchanged with disagreement 0.
// Fusion is pure and commutative: shuffling the inputs cannot change the
// result.
//
// The weight book also carries per-analyst rolling accuracy (30-day EWMA)
// so weights can be recomputed and upserted through persistence.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysts::Signal;
use crate::config::FusionConfig;
use crate::regime::Regime;
use crate::types::Pair;

/// Weight applied when an analyst has no row at all.
const FALLBACK_WEIGHT: f64 = 0.10;

/// EWMA smoothing for the 30-day rolling accuracy (alpha = 2 / (30 + 1)).
const ACCURACY_ALPHA: f64 = 2.0 / 31.0;

// ---------------------------------------------------------------------------
// Weight book
// ---------------------------------------------------------------------------

/// One weight row. `regime = None` is the default row for the analyst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystWeight {
    pub analyst: String,
    pub regime: Option<Regime>,
    pub weight: f64,
    pub rolling_accuracy_30d: f64,
    pub sample_count: u64,
}

/// All weight rows, unique on (analyst, regime).
#[derive(Debug, Clone, Default)]
pub struct WeightBook {
    rows: HashMap<(String, Option<Regime>), AnalystWeight>,
}

impl WeightBook {
    /// Seed the standard roster with default weights.
    pub fn seeded() -> Self {
        let mut book = Self::default();
        for (analyst, weight) in [
            ("technical", 0.45),
            ("sentiment", 0.35),
            ("orderbook", 0.10),
            ("onchain", 0.05),
            ("macro", 0.05),
        ] {
            book.set_weight(analyst, None, weight);
        }
        book
    }

    /// Build from configuration, starting from the seeded defaults.
    pub fn from_config(config: &FusionConfig) -> Self {
        let mut book = Self::seeded();
        for (analyst, weight) in &config.default_weights {
            book.set_weight(analyst, None, *weight);
        }
        for (regime_name, weights) in &config.regime_weights {
            if let Some(regime) = Regime::from_str_opt(regime_name) {
                for (analyst, weight) in weights {
                    book.set_weight(analyst, Some(regime), *weight);
                }
            }
        }
        book
    }

    pub fn set_weight(&mut self, analyst: &str, regime: Option<Regime>, weight: f64) {
        let key = (analyst.to_string(), regime);
        self.rows
            .entry(key)
            .and_modify(|row| row.weight = weight.clamp(0.0, 1.0))
            .or_insert_with(|| AnalystWeight {
                analyst: analyst.to_string(),
                regime,
                weight: weight.clamp(0.0, 1.0),
                rolling_accuracy_30d: 0.5,
                sample_count: 0,
            });
    }

    /// Weight for an analyst under a regime: regime row, else default row,
    /// else the fallback constant.
    pub fn weight_for(&self, analyst: &str, regime: Regime) -> f64 {
        if let Some(row) = self.rows.get(&(analyst.to_string(), Some(regime))) {
            return row.weight;
        }
        if let Some(row) = self.rows.get(&(analyst.to_string(), None)) {
            return row.weight;
        }
        FALLBACK_WEIGHT
    }

    /// Record whether an analyst's direction agreed with the realized
    /// outcome, updating its rolling accuracy.
    pub fn record_outcome(&mut self, analyst: &str, regime: Option<Regime>, correct: bool) {
        let key = (analyst.to_string(), regime);
        let row = self.rows.entry(key).or_insert_with(|| AnalystWeight {
            analyst: analyst.to_string(),
            regime,
            weight: FALLBACK_WEIGHT,
            rolling_accuracy_30d: 0.5,
            sample_count: 0,
        });
        let observation = if correct { 1.0 } else { 0.0 };
        row.rolling_accuracy_30d =
            row.rolling_accuracy_30d * (1.0 - ACCURACY_ALPHA) + observation * ACCURACY_ALPHA;
        row.sample_count += 1;
    }

    pub fn rows(&self) -> Vec<AnalystWeight> {
        self.rows.values().cloned().collect()
    }

    pub fn upsert(&mut self, row: AnalystWeight) {
        self.rows
            .insert((row.analyst.clone(), row.regime), row);
    }
}

// ---------------------------------------------------------------------------
// Fused signal
// ---------------------------------------------------------------------------

/// The combined opinion for one pair, with its inputs attached for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedSignal {
    pub pair: Pair,
    pub direction: f64,
    pub confidence: f64,
    /// Weighted dispersion of contributing directions, in [0, 1].
    pub disagreement: f64,
    pub regime: Regime,
    pub contributing: Vec<Signal>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What each analyst said last cycle, kept to score it against the realized
/// price move.
struct SignalNote {
    price: f64,
    regime: Regime,
    directions: Vec<(String, f64)>,
}

pub struct FusionEngine {
    weights: RwLock<WeightBook>,
    history: RwLock<HashMap<Pair, SignalNote>>,
    penalty_factor: f64,
}

impl FusionEngine {
    pub fn new(book: WeightBook, penalty_factor: f64) -> Self {
        Self {
            weights: RwLock::new(book),
            history: RwLock::new(HashMap::new()),
            penalty_factor,
        }
    }

    pub fn from_config(config: &FusionConfig) -> Self {
        Self::new(WeightBook::from_config(config), config.disagreement_penalty)
    }

    /// Fuse one pair's signals. Returns `None` when every analyst abstained.
    pub fn fuse(&self, pair: &Pair, signals: Vec<Signal>, regime: Regime) -> Option<FusedSignal> {
        let active: Vec<Signal> = signals
            .into_iter()
            .filter(|s| s.confidence > 0.0)
            .collect();

        if active.is_empty() {
            return None;
        }

        // Fewer than two voices: inherit the single signal unchanged.
        if active.len() == 1 {
            let only = &active[0];
            return Some(FusedSignal {
                pair: pair.clone(),
                direction: only.direction,
                confidence: only.confidence,
                disagreement: 0.0,
                regime,
                contributing: active,
            });
        }

        let book = self.weights.read();
        let raw: Vec<f64> = active
            .iter()
            .map(|s| book.weight_for(&s.source, regime))
            .collect();
        drop(book);

        let weights = normalize(&raw);

        let direction: f64 = weights
            .iter()
            .zip(&active)
            .map(|(w, s)| w * s.direction)
            .sum();

        let variance: f64 = weights
            .iter()
            .zip(&active)
            .map(|(w, s)| w * (s.direction - direction).powi(2))
            .sum();
        let disagreement = variance.sqrt().clamp(0.0, 1.0);

        let penalty = disagreement * self.penalty_factor;
        let confidence: f64 = weights
            .iter()
            .zip(&active)
            .map(|(w, s)| w * s.confidence)
            .sum::<f64>()
            * (1.0 - penalty);

        debug!(
            pair = %pair,
            regime = %regime,
            direction = format!("{direction:+.3}"),
            confidence = format!("{confidence:.3}"),
            disagreement = format!("{disagreement:.3}"),
            signals = active.len(),
            "signals fused"
        );

        Some(FusedSignal {
            pair: pair.clone(),
            direction: direction.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            disagreement,
            regime,
            contributing: active,
        })
    }

    /// Record analyst outcomes after a trade resolves.
    pub fn record_outcome(&self, analyst: &str, regime: Option<Regime>, correct: bool) {
        self.weights.write().record_outcome(analyst, regime, correct);
    }

    /// Score last cycle's directional calls against the realized price move,
    /// then note the current ones for the next pass. Returns the weight rows
    /// touched, ready for persistence upsert.
    pub fn score_and_note(
        &self,
        pair: &Pair,
        price: f64,
        fused: &FusedSignal,
    ) -> Vec<AnalystWeight> {
        let mut touched: Vec<String> = Vec::new();

        let mut history = self.history.write();
        if let Some(prev) = history.get(pair) {
            if prev.price > 0.0 && price > 0.0 && (price - prev.price).abs() > f64::EPSILON {
                let moved_up = price > prev.price;
                let mut book = self.weights.write();
                for (source, direction) in &prev.directions {
                    // Near-neutral calls are not scored.
                    if direction.abs() < 0.05 {
                        continue;
                    }
                    let correct = (*direction > 0.0) == moved_up;
                    book.record_outcome(source, Some(prev.regime), correct);
                    book.record_outcome(source, None, correct);
                    touched.push(source.clone());
                }
            }
        }
        history.insert(
            pair.clone(),
            SignalNote {
                price,
                regime: fused.regime,
                directions: fused
                    .contributing
                    .iter()
                    .map(|s| (s.source.clone(), s.direction))
                    .collect(),
            },
        );
        drop(history);

        if touched.is_empty() {
            return Vec::new();
        }
        self.weights
            .read()
            .rows()
            .into_iter()
            .filter(|row| touched.iter().any(|s| *s == row.analyst))
            .collect()
    }

    /// Snapshot of every weight row, for persistence upserts.
    pub fn weight_rows(&self) -> Vec<AnalystWeight> {
        self.weights.read().rows()
    }

    pub fn upsert_weight(&self, row: AnalystWeight) {
        self.weights.write().upsert(row);
    }

    /// Replace the whole book (runtime config patch).
    pub fn replace_book(&self, book: WeightBook) {
        *self.weights.write() = book;
    }
}

/// Renormalize weights to sum to 1. Applying this twice equals applying it
/// once; an all-zero input falls back to uniform weights.
pub fn normalize(weights: &[f64]) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        let n = weights.len().max(1);
        return vec![1.0 / n as f64; weights.len()];
    }
    weights.iter().map(|w| w / sum).collect()
}
