// =============================================================================
// Strategist — pluggable proposal policy (rules / LLM / hybrid)
// =============================================================================
//
// The strategist converts portfolio state plus the fused signal into an
// action proposal. Three modes:
//
//   rules  — deterministic thresholds, no external calls.
//   llm    — every call goes to the model; parse failure or timeout falls
//            back to rules with a logged `fallback=true` marker.
//   hybrid — clear signals use rules; ambiguous ones escalate:
//            use_llm = |direction| < 0.4 OR disagreement > 0.3.
//
// A missing LLM key or an exhausted daily budget forces rules mode.
// =============================================================================

pub mod llm;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, StrategistMode};
use crate::costs::{CostTracker, LlmUsage};
use crate::fusion::FusedSignal;
use crate::ledger::{Portfolio, RealizedTrade};
use crate::types::{Pair, TradeAction};

pub use llm::LlmStrategist;
pub use rules::{RuleStrategist, RULES_MODEL};

/// Hybrid escalation: weak direction goes to the LLM.
const HYBRID_DIRECTION_BAND: f64 = 0.4;
/// Hybrid escalation: high disagreement goes to the LLM.
const HYBRID_DISAGREEMENT_FLOOR: f64 = 0.3;

/// An action proposal for one pair. BUY sizes are quote notional, SELL sizes
/// base quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub action: TradeAction,
    pub size: f64,
    pub confidence: f64,
    pub reasoning: String,
    /// "rules" or the LLM model name that produced this proposal.
    pub model: String,
    /// True when an LLM failure degraded this call to the rule policy.
    pub fallback: bool,
}

impl Proposal {
    pub fn hold(reasoning: impl Into<String>, model: &str) -> Self {
        Self {
            action: TradeAction::Hold,
            size: 0.0,
            confidence: 0.0,
            reasoning: reasoning.into(),
            model: model.to_string(),
            fallback: false,
        }
    }
}

pub struct Strategist {
    mode: parking_lot::RwLock<StrategistMode>,
    rules: RuleStrategist,
    llm: Option<LlmStrategist>,
    llm_timeout: Duration,
    costs: Arc<CostTracker>,
}

impl Strategist {
    pub fn new(config: &Config, costs: Arc<CostTracker>) -> Self {
        let mode = config.effective_strategist_mode();

        let llm = if mode != StrategistMode::Rules {
            config.credentials.llm_api_key.as_ref().map(|key| {
                LlmStrategist::new(
                    key.clone(),
                    config.credentials.llm_api_url.clone(),
                    config.strategist.llm_model.clone(),
                    Duration::from_secs(config.strategist.llm_timeout_s),
                )
            })
        } else {
            None
        };

        info!(mode = ?mode, llm_enabled = llm.is_some(), "strategist initialised");

        Self {
            mode: parking_lot::RwLock::new(mode),
            rules: RuleStrategist::new(&config.strategist, &config.risk),
            llm,
            llm_timeout: Duration::from_secs(config.strategist.llm_timeout_s),
            costs,
        }
    }

    /// Runtime mode switch. Without an LLM client, llm/hybrid stay rules.
    pub fn set_mode(&self, mode: StrategistMode) {
        *self.mode.write() = if self.llm.is_none() && mode != StrategistMode::Rules {
            warn!("no LLM client available — strategist stays in rules mode");
            StrategistMode::Rules
        } else {
            mode
        };
    }

    /// Produce a proposal for one pair.
    pub async fn propose(
        &self,
        pair: &Pair,
        fused: &FusedSignal,
        portfolio: &Portfolio,
        recent_trades: &[RealizedTrade],
        base_order_quote: f64,
        cycle_id: u64,
    ) -> Proposal {
        let use_llm = match *self.mode.read() {
            StrategistMode::Rules => false,
            StrategistMode::Llm => true,
            StrategistMode::Hybrid => {
                fused.direction.abs() < HYBRID_DIRECTION_BAND
                    || fused.disagreement > HYBRID_DISAGREEMENT_FLOOR
            }
        };

        if !use_llm {
            return self.rules.propose(pair, fused, portfolio);
        }

        // Budget exhaustion forces rules mode for the rest of the day.
        if self.costs.over_budget() {
            let mut proposal = self.rules.propose(pair, fused, portfolio);
            proposal.reasoning =
                format!("llm budget exhausted; {}", proposal.reasoning);
            return proposal;
        }

        let Some(llm) = &self.llm else {
            return self.rules.propose(pair, fused, portfolio);
        };

        let call = llm.propose(
            pair,
            fused,
            portfolio,
            recent_trades,
            base_order_quote,
            cycle_id,
        );

        match tokio::time::timeout(self.llm_timeout, call).await {
            Ok(Ok((proposal, usage))) => {
                self.costs.record(usage);
                proposal
            }
            Ok(Err(e)) => {
                warn!(pair = %pair, error = %e, "LLM strategist failed — falling back to rules");
                self.costs.record(LlmUsage::failed(llm.model(), cycle_id));
                self.rule_fallback(pair, fused, portfolio, "error")
            }
            Err(_) => {
                warn!(pair = %pair, "LLM strategist timed out — falling back to rules");
                self.costs.record(LlmUsage::failed(llm.model(), cycle_id));
                self.rule_fallback(pair, fused, portfolio, "timeout")
            }
        }
    }

    fn rule_fallback(
        &self,
        pair: &Pair,
        fused: &FusedSignal,
        portfolio: &Portfolio,
        cause: &str,
    ) -> Proposal {
        let mut proposal = self.rules.propose(pair, fused, portfolio);
        proposal.fallback = true;
        proposal.reasoning = format!("fallback=true ({cause}); {}", proposal.reasoning);
        proposal
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysts::Signal;
    use crate::config::Config;
    use crate::regime::Regime;
    use chrono::Utc;
    use std::collections::HashMap;

    fn pair() -> Pair {
        Pair::new("BTC", "AUD")
    }

    fn fused(direction: f64, confidence: f64, disagreement: f64) -> FusedSignal {
        FusedSignal {
            pair: pair(),
            direction,
            confidence,
            disagreement,
            regime: Regime::Ranging,
            contributing: vec![Signal::new("technical", &pair(), direction, confidence, "t")],
        }
    }

    fn portfolio() -> Portfolio {
        Portfolio {
            available_quote: 1000.0,
            positions: HashMap::new(),
            total_value: 1000.0,
            timestamp: Utc::now(),
        }
    }

    fn rules_strategist() -> Strategist {
        let config = Config::default();
        Strategist::new(&config, Arc::new(CostTracker::new(5.0)))
    }

    #[tokio::test]
    async fn rules_mode_never_touches_llm() {
        let strategist = rules_strategist();
        let proposal = strategist
            .propose(&pair(), &fused(0.6, 0.8, 0.1), &portfolio(), &[], 250.0, 1)
            .await;
        assert_eq!(proposal.action, TradeAction::Buy);
        assert_eq!(proposal.model, RULES_MODEL);
        assert!(!proposal.fallback);
    }

    #[tokio::test]
    async fn llm_mode_without_client_degrades_to_rules() {
        // Config requests llm mode but no key is present, so the effective
        // mode is rules.
        let mut config = Config::default();
        config.strategist.mode = StrategistMode::Llm;
        let strategist = Strategist::new(&config, Arc::new(CostTracker::new(5.0)));

        let proposal = strategist
            .propose(&pair(), &fused(0.6, 0.8, 0.1), &portfolio(), &[], 250.0, 1)
            .await;
        assert_eq!(proposal.model, RULES_MODEL);
    }

    #[tokio::test]
    async fn llm_timeout_falls_back_with_marker_and_zero_tokens() {
        // A key is present but the endpoint points at an unroutable address,
        // so the call fails and the rule fallback fires.
        let mut config = Config::default();
        config.strategist.mode = StrategistMode::Llm;
        config.strategist.llm_timeout_s = 1;
        config.credentials.llm_api_key = Some("test-key".into());
        config.credentials.llm_api_url =
            Some("http://127.0.0.1:1/v1/chat/completions".into());

        let costs = Arc::new(CostTracker::new(5.0));
        let strategist = Strategist::new(&config, costs.clone());

        let proposal = strategist
            .propose(&pair(), &fused(0.6, 0.8, 0.1), &portfolio(), &[], 250.0, 42)
            .await;

        assert!(proposal.fallback);
        assert!(proposal.reasoning.contains("fallback=true"));
        // The failed call is accounted with zero tokens.
        let usage = costs.for_cycle(42);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].input_tokens, 0);
        assert_eq!(usage[0].output_tokens, 0);
    }

    #[tokio::test]
    async fn hybrid_uses_rules_on_clear_signals() {
        let mut config = Config::default();
        config.strategist.mode = StrategistMode::Hybrid;
        config.credentials.llm_api_key = Some("test-key".into());
        config.credentials.llm_api_url =
            Some("http://127.0.0.1:1/v1/chat/completions".into());

        let costs = Arc::new(CostTracker::new(5.0));
        let strategist = Strategist::new(&config, costs.clone());

        // Clear: |direction| = 0.6 >= 0.4 and disagreement 0.1 <= 0.3.
        let proposal = strategist
            .propose(&pair(), &fused(0.6, 0.8, 0.1), &portfolio(), &[], 250.0, 1)
            .await;
        assert_eq!(proposal.model, RULES_MODEL);
        assert!(!proposal.fallback);
        // No LLM call was attempted.
        assert_eq!(costs.totals().total_calls, 0);
    }

    #[tokio::test]
    async fn hybrid_escalates_ambiguous_signals() {
        let mut config = Config::default();
        config.strategist.mode = StrategistMode::Hybrid;
        config.strategist.llm_timeout_s = 1;
        config.credentials.llm_api_key = Some("test-key".into());
        config.credentials.llm_api_url =
            Some("http://127.0.0.1:1/v1/chat/completions".into());

        let costs = Arc::new(CostTracker::new(5.0));
        let strategist = Strategist::new(&config, costs.clone());

        // Ambiguous: |direction| 0.2 < 0.4 escalates, endpoint fails, rules
        // fallback fires.
        let proposal = strategist
            .propose(&pair(), &fused(0.2, 0.8, 0.1), &portfolio(), &[], 250.0, 1)
            .await;
        assert!(proposal.fallback);
        assert_eq!(costs.totals().total_calls, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_forces_rules() {
        let mut config = Config::default();
        config.strategist.mode = StrategistMode::Llm;
        config.credentials.llm_api_key = Some("test-key".into());
        config.strategist.daily_budget_usd = 0.0;

        let costs = Arc::new(CostTracker::new(0.0));
        let strategist = Strategist::new(&config, costs.clone());

        let proposal = strategist
            .propose(&pair(), &fused(0.6, 0.8, 0.1), &portfolio(), &[], 250.0, 1)
            .await;
        assert_eq!(proposal.model, RULES_MODEL);
        assert!(proposal.reasoning.contains("budget"));
        assert_eq!(costs.totals().total_calls, 0);
    }
}
