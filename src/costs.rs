// =============================================================================
// Cost Accounting — LLM spend attribution per cycle
// =============================================================================
//
// Every strategist LLM call lands here, including failed calls (recorded with
// zero tokens so call counts stay honest). Counters are read-only to the rest
// of the engine; the strategist consults `over_budget` to decide whether to
// force rules mode for the day.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bounded usage history (covers any daily window comfortably).
const USAGE_RETENTION: usize = 4096;

/// One LLM call's usage, attributed to the cycle that made it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub model: String,
    pub cycle_id: u64,
    pub cached_hit: bool,
    pub at: DateTime<Utc>,
}

impl LlmUsage {
    /// A failed or timed-out call: counted, zero tokens, zero cost.
    pub fn failed(model: &str, cycle_id: u64) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            model: model.to_string(),
            cycle_id,
            cached_hit: false,
            at: Utc::now(),
        }
    }
}

/// Aggregate counters exposed to status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTotals {
    pub total_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub spend_today_usd: f64,
}

pub struct CostTracker {
    entries: RwLock<VecDeque<LlmUsage>>,
    daily_budget_usd: f64,
}

impl CostTracker {
    pub fn new(daily_budget_usd: f64) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            daily_budget_usd,
        }
    }

    pub fn record(&self, usage: LlmUsage) {
        debug!(
            model = %usage.model,
            cycle_id = usage.cycle_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = usage.cost_usd,
            "LLM usage recorded"
        );
        let mut entries = self.entries.write();
        entries.push_back(usage);
        while entries.len() > USAGE_RETENTION {
            entries.pop_front();
        }
    }

    /// Spend over the trailing 24 hours.
    pub fn spend_today(&self) -> f64 {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        self.entries
            .read()
            .iter()
            .filter(|u| u.at >= cutoff)
            .map(|u| u.cost_usd)
            .sum()
    }

    /// Whether the daily budget is exhausted. The strategist treats this as
    /// "force rules mode".
    pub fn over_budget(&self) -> bool {
        let spend = self.spend_today();
        let over = spend >= self.daily_budget_usd;
        if over {
            warn!(
                spend_usd = spend,
                budget_usd = self.daily_budget_usd,
                "daily LLM budget exhausted"
            );
        }
        over
    }

    pub fn totals(&self) -> CostTotals {
        let entries = self.entries.read();
        CostTotals {
            total_calls: entries.len() as u64,
            total_input_tokens: entries.iter().map(|u| u.input_tokens).sum(),
            total_output_tokens: entries.iter().map(|u| u.output_tokens).sum(),
            total_cost_usd: entries.iter().map(|u| u.cost_usd).sum(),
            spend_today_usd: self.spend_today(),
        }
    }

    /// Usage entries attributed to one cycle.
    pub fn for_cycle(&self, cycle_id: u64) -> Vec<LlmUsage> {
        self.entries
            .read()
            .iter()
            .filter(|u| u.cycle_id == cycle_id)
            .cloned()
            .collect()
    }
}
