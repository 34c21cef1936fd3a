// =============================================================================
// Rule-based Strategist — cheap deterministic proposals
// =============================================================================
//
// HOLD below the confidence floor; BUY when fused direction clears the
// threshold, sized by confidence; symmetric SELL closes into held inventory.
// =============================================================================

use tracing::debug;

use crate::config::{RiskConfig, StrategistConfig};
use crate::fusion::FusedSignal;
use crate::ledger::Portfolio;
use crate::types::{Pair, TradeAction};

use super::Proposal;

/// Model tag carried on every rule-based proposal.
pub const RULES_MODEL: &str = "rules";

#[derive(Debug, Clone)]
pub struct RuleStrategist {
    min_confidence: f64,
    threshold_buy: f64,
    base_order_quote: f64,
    min_order_quote: f64,
    max_position_pct: f64,
}

impl RuleStrategist {
    pub fn new(strategist: &StrategistConfig, risk: &RiskConfig) -> Self {
        Self {
            min_confidence: risk.min_confidence,
            threshold_buy: strategist.threshold_buy,
            base_order_quote: strategist.base_order_quote,
            min_order_quote: strategist.min_order_quote,
            max_position_pct: risk.max_position_pct,
        }
    }

    pub fn propose(
        &self,
        pair: &Pair,
        fused: &FusedSignal,
        portfolio: &Portfolio,
    ) -> Proposal {
        if fused.confidence < self.min_confidence {
            return Proposal::hold(
                format!(
                    "confidence {:.2} below floor {:.2}",
                    fused.confidence, self.min_confidence
                ),
                RULES_MODEL,
            );
        }

        let max_quote = self.max_position_pct * portfolio.total_value;

        if fused.direction >= self.threshold_buy {
            let size = (self.base_order_quote * fused.confidence)
                .clamp(self.min_order_quote, max_quote.max(self.min_order_quote));
            debug!(pair = %pair, size, "rule strategist proposes BUY");
            return Proposal {
                action: TradeAction::Buy,
                size,
                confidence: fused.confidence,
                reasoning: format!(
                    "direction {:+.2} >= +{:.2}, regime {}",
                    fused.direction, self.threshold_buy, fused.regime
                ),
                model: RULES_MODEL.to_string(),
                fallback: false,
            };
        }

        if fused.direction <= -self.threshold_buy {
            // Spot engine: a SELL can only close held inventory.
            let Some(position) = portfolio.position(pair) else {
                return Proposal::hold(
                    format!(
                        "direction {:+.2} bearish but no position to close",
                        fused.direction
                    ),
                    RULES_MODEL,
                );
            };

            let price = if position.quantity_base > 0.0 {
                position.current_value / position.quantity_base
            } else {
                0.0
            };
            let desired_quote = (self.base_order_quote * fused.confidence)
                .clamp(self.min_order_quote, max_quote.max(self.min_order_quote));
            let desired_base = if price > 0.0 {
                desired_quote / price
            } else {
                position.quantity_base
            };
            let size = desired_base.min(position.quantity_base);

            debug!(pair = %pair, size, "rule strategist proposes SELL");
            return Proposal {
                action: TradeAction::Sell,
                size,
                confidence: fused.confidence,
                reasoning: format!(
                    "direction {:+.2} <= -{:.2}, regime {}",
                    fused.direction, self.threshold_buy, fused.regime
                ),
                model: RULES_MODEL.to_string(),
                fallback: false,
            };
        }

        Proposal::hold(
            format!(
                "direction {:+.2} inside ±{:.2} band",
                fused.direction, self.threshold_buy
            ),
            RULES_MODEL,
        )
    }
}
