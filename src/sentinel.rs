// =============================================================================
// Risk Sentinel — proposal gating, circuit breakers, stop-loss enforcement
// =============================================================================
//
// Rules run in order and can approve, resize, or veto a proposal:
//   1. confidence gate        (veto)
//   2. per-pair cooldown      (veto)
//   3. position cap           (resize, veto at zero headroom)
//   4. exposure cap           (resize, veto at zero headroom)
//   5. available balance      (veto, BUY only)
//   6. circuit breakers       (veto BUYs; SELL-to-close per policy flag)
//   7. stop-loss synthesis    (attached to approved BUYs)
//
// Breaker family: daily_loss, trade_frequency, volatility, consecutive_loss,
// anomaly. Each trips on threshold crossing (event emitted) and clears only
// after the value returns under threshold AND its cooldown elapses. Breaker
// state is persisted and survives restarts.
//
// The sentinel also owns the independent stop-loss monitor that runs between
// cycles and closes breached positions with a synthetic SELL, bypassing the
// strategist.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{BreakerConfig, RiskConfig};
use crate::cycle::Decision;
use crate::events::{Event, EventBus};
use crate::exchange::ExchangeApi;
use crate::executor::Executor;
use crate::ledger::{Ledger, Portfolio};
use crate::strategist::Proposal;
use crate::types::{Pair, TradeAction};

/// Cycle id recorded on out-of-cycle synthetic decisions.
pub const OUT_OF_CYCLE: u64 = 0;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The sentinel's ruling on a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Verdict {
    Approve {
        size: f64,
        stop_loss: Option<f64>,
    },
    Resize {
        size: f64,
        stop_loss: Option<f64>,
        reason: String,
    },
    Veto {
        reason: String,
    },
}

impl Verdict {
    pub fn is_veto(&self) -> bool {
        matches!(self, Self::Veto { .. })
    }

    /// The size that may actually trade, if any.
    pub fn approved_size(&self) -> Option<f64> {
        match self {
            Self::Approve { size, .. } | Self::Resize { size, .. } => Some(*size),
            Self::Veto { .. } => None,
        }
    }

    pub fn stop_loss(&self) -> Option<f64> {
        match self {
            Self::Approve { stop_loss, .. } | Self::Resize { stop_loss, .. } => *stop_loss,
            Self::Veto { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Approve { .. } => "approve".to_string(),
            Self::Resize { reason, .. } => format!("resize: {reason}"),
            Self::Veto { reason } => format!("veto: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breakers
// ---------------------------------------------------------------------------

/// Persisted state of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    pub name: String,
    pub tripped: bool,
    pub tripped_at: Option<DateTime<Utc>>,
    pub value: f64,
    pub threshold: f64,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new(name: &str, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            tripped: false,
            tripped_at: None,
            value: 0.0,
            threshold,
            cooldown_until: None,
        }
    }
}

struct Breaker {
    state: BreakerState,
    cooldown: chrono::Duration,
}

impl Breaker {
    /// Feed the current value; returns the transition event, if any.
    fn update(&mut self, value: f64, now: DateTime<Utc>) -> Option<Event> {
        self.state.value = value;
        let over = value >= self.state.threshold;

        if !self.state.tripped && over {
            self.state.tripped = true;
            self.state.tripped_at = Some(now);
            self.state.cooldown_until = Some(now + self.cooldown);
            warn!(
                breaker = %self.state.name,
                value,
                threshold = self.state.threshold,
                "circuit breaker tripped"
            );
            return Some(Event::BreakerTripped {
                name: self.state.name.clone(),
                value,
                threshold: self.state.threshold,
            });
        }

        if self.state.tripped && !over {
            let cooled = self
                .state
                .cooldown_until
                .map(|until| now >= until)
                .unwrap_or(true);
            if cooled {
                self.state.tripped = false;
                self.state.tripped_at = None;
                self.state.cooldown_until = None;
                info!(breaker = %self.state.name, "circuit breaker cleared");
                return Some(Event::BreakerCleared {
                    name: self.state.name.clone(),
                });
            }
        }

        None
    }
}

/// Inputs for one breaker evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    /// Rolling 24 h realized + unrealized P&L, as a loss fraction of
    /// starting equity (positive = losing).
    pub daily_loss_frac: f64,
    /// Trades over the last 24 h.
    pub trades_24h: u32,
    /// Largest 1 h absolute price move across held pairs, as a fraction.
    pub max_held_move_1h: f64,
    /// Trailing consecutive losing trades.
    pub consecutive_losses: u32,
    /// Highest anomaly score across observed pairs.
    pub anomaly_score: f64,
}

// ---------------------------------------------------------------------------
// Market observations
// ---------------------------------------------------------------------------

/// Per-pair observations the cycle feeds in for breaker evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketObservation {
    pub move_1h_pct: f64,
    pub anomaly_score: f64,
}

/// Absolute z-score of the latest return against the trailing window.
/// This is the anomaly detector feeding the `anomaly` breaker.
pub fn anomaly_score(closes: &[f64]) -> f64 {
    if closes.len() < 20 {
        return 0.0;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 3 {
        return 0.0;
    }

    let (baseline, last) = returns.split_at(returns.len() - 1);
    let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
    let variance = baseline
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / baseline.len() as f64;
    let std = variance.sqrt();
    if std < 1e-12 {
        return 0.0;
    }
    ((last[0] - mean) / std).abs()
}

// ---------------------------------------------------------------------------
// Sentinel
// ---------------------------------------------------------------------------

pub struct Sentinel {
    risk: RwLock<RiskConfig>,
    breakers: RwLock<Vec<Breaker>>,
    last_trade_at: RwLock<HashMap<Pair, DateTime<Utc>>>,
    trade_times: RwLock<VecDeque<DateTime<Utc>>>,
    observations: RwLock<HashMap<Pair, MarketObservation>>,
    events: EventBus,
    starting_equity: f64,
}

impl Sentinel {
    pub fn new(
        risk: RiskConfig,
        breaker_config: &BreakerConfig,
        starting_equity: f64,
        events: EventBus,
    ) -> Self {
        let cooldown = chrono::Duration::minutes(breaker_config.cooldown_minutes as i64);
        let breakers = vec![
            Breaker {
                state: BreakerState::new("daily_loss", breaker_config.max_daily_loss_pct),
                cooldown,
            },
            Breaker {
                state: BreakerState::new(
                    "trade_frequency",
                    breaker_config.max_daily_trades as f64,
                ),
                cooldown,
            },
            Breaker {
                state: BreakerState::new(
                    "volatility",
                    breaker_config.volatility_threshold_pct,
                ),
                cooldown,
            },
            Breaker {
                state: BreakerState::new(
                    "consecutive_loss",
                    breaker_config.consecutive_loss_limit as f64,
                ),
                cooldown,
            },
            Breaker {
                state: BreakerState::new("anomaly", breaker_config.anomaly_threshold),
                cooldown,
            },
        ];

        info!(
            starting_equity,
            breakers = breakers.len(),
            "risk sentinel initialised"
        );

        Self {
            risk: RwLock::new(risk),
            breakers: RwLock::new(breakers),
            last_trade_at: RwLock::new(HashMap::new()),
            trade_times: RwLock::new(VecDeque::new()),
            observations: RwLock::new(HashMap::new()),
            events,
            starting_equity,
        }
    }

    /// Apply a runtime threshold patch.
    pub fn update_config(&self, risk: RiskConfig, breaker_config: &BreakerConfig) {
        *self.risk.write() = risk;
        let mut breakers = self.breakers.write();
        for breaker in breakers.iter_mut() {
            breaker.state.threshold = match breaker.state.name.as_str() {
                "daily_loss" => breaker_config.max_daily_loss_pct,
                "trade_frequency" => breaker_config.max_daily_trades as f64,
                "volatility" => breaker_config.volatility_threshold_pct,
                "consecutive_loss" => breaker_config.consecutive_loss_limit as f64,
                "anomaly" => breaker_config.anomaly_threshold,
                _ => breaker.state.threshold,
            };
            breaker.cooldown =
                chrono::Duration::minutes(breaker_config.cooldown_minutes as i64);
        }
    }

    // -------------------------------------------------------------------------
    // Proposal review
    // -------------------------------------------------------------------------

    /// Run the full rule chain against a BUY/SELL proposal.
    pub fn review(
        &self,
        pair: &Pair,
        proposal: &Proposal,
        portfolio: &Portfolio,
        current_price: f64,
    ) -> Verdict {
        let risk = self.risk.read().clone();

        // 1. Confidence gate.
        if proposal.confidence < risk.min_confidence {
            return Verdict::Veto {
                reason: format!(
                    "confidence {:.2} below minimum {:.2}",
                    proposal.confidence, risk.min_confidence
                ),
            };
        }

        // 2. Per-pair cooldown.
        if let Some(last) = self.last_trade_at.read().get(pair) {
            let elapsed_hours = (Utc::now() - *last).num_seconds() as f64 / 3600.0;
            if elapsed_hours < risk.min_hold_time_hours {
                return Verdict::Veto {
                    reason: format!(
                        "pair traded {elapsed_hours:.1}h ago (cooldown {:.1}h)",
                        risk.min_hold_time_hours
                    ),
                };
            }
        }

        match proposal.action {
            TradeAction::Buy => self.review_buy(pair, proposal, portfolio, current_price, &risk),
            TradeAction::Sell => self.review_sell(&risk, proposal),
            TradeAction::Hold => Verdict::Veto {
                reason: "hold proposals are not executable".to_string(),
            },
        }
    }

    fn review_buy(
        &self,
        pair: &Pair,
        proposal: &Proposal,
        portfolio: &Portfolio,
        current_price: f64,
        risk: &RiskConfig,
    ) -> Verdict {
        let mut size = proposal.size;
        let mut resize_reason: Option<String> = None;

        // 3. Position cap.
        let position_cap = risk.max_position_pct * portfolio.total_value;
        let existing = portfolio
            .position(pair)
            .map(|p| p.current_value)
            .unwrap_or(0.0);
        if existing + size > position_cap {
            let headroom = position_cap - existing;
            if headroom <= 0.0 {
                return Verdict::Veto {
                    reason: format!(
                        "position cap reached ({existing:.2} of {position_cap:.2})"
                    ),
                };
            }
            resize_reason = Some(format!(
                "position cap {:.0}% of portfolio",
                risk.max_position_pct * 100.0
            ));
            size = headroom;
        }

        // 4. Exposure cap.
        let exposure_cap = risk.max_exposure_pct * portfolio.total_value;
        let invested = portfolio.invested_value();
        if invested + size > exposure_cap {
            let headroom = exposure_cap - invested;
            if headroom <= 0.0 {
                return Verdict::Veto {
                    reason: format!("exposure cap reached ({invested:.2} of {exposure_cap:.2})"),
                };
            }
            resize_reason = Some(format!(
                "exposure cap {:.0}% of portfolio",
                risk.max_exposure_pct * 100.0
            ));
            size = size.min(headroom);
        }

        // 5. Available balance.
        if size > portfolio.available_quote - risk.reserve_quote {
            return Verdict::Veto {
                reason: format!(
                    "size {size:.2} exceeds available {:.2} (reserve {:.2})",
                    portfolio.available_quote, risk.reserve_quote
                ),
            };
        }

        // 6. Circuit breakers: any tripped breaker blocks new risk.
        if let Some(name) = self.tripped_breaker_name() {
            return Verdict::Veto {
                reason: format!("circuit breaker '{name}' is tripped"),
            };
        }

        // 7. Stop-loss synthesis for approved BUYs.
        let stop_loss = Some(current_price * (1.0 - risk.stop_loss_pct));

        match resize_reason {
            Some(reason) => {
                debug!(pair = %pair, size, %reason, "proposal resized");
                Verdict::Resize {
                    size,
                    stop_loss,
                    reason,
                }
            }
            None => Verdict::Approve { size, stop_loss },
        }
    }

    fn review_sell(&self, risk: &RiskConfig, proposal: &Proposal) -> Verdict {
        if let Some(name) = self.tripped_breaker_name() {
            if !risk.allow_risk_off_sells {
                return Verdict::Veto {
                    reason: format!(
                        "circuit breaker '{name}' is tripped and risk-off sells are disabled"
                    ),
                };
            }
        }
        Verdict::Approve {
            size: proposal.size,
            stop_loss: None,
        }
    }

    // -------------------------------------------------------------------------
    // Trade bookkeeping
    // -------------------------------------------------------------------------

    /// Record that an order actually traded on a pair (cooldown + frequency).
    pub fn record_trade(&self, pair: &Pair) {
        let now = Utc::now();
        self.last_trade_at.write().insert(pair.clone(), now);
        let mut times = self.trade_times.write();
        times.push_back(now);
        let cutoff = now - chrono::Duration::hours(24);
        while times.front().map(|t| *t < cutoff).unwrap_or(false) {
            times.pop_front();
        }
    }

    /// Feed per-pair observations computed by the cycle.
    pub fn observe_market(&self, pair: &Pair, observation: MarketObservation) {
        self.observations.write().insert(pair.clone(), observation);
    }

    // -------------------------------------------------------------------------
    // Breaker evaluation
    // -------------------------------------------------------------------------

    /// Gather inputs from the ledger and observations, then update every
    /// breaker, emitting transition events.
    pub fn evaluate_breakers(&self, ledger: &Ledger) {
        let inputs = self.collect_inputs(ledger);
        self.evaluate_with_inputs(&inputs);
    }

    fn collect_inputs(&self, ledger: &Ledger) -> RiskInputs {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let realized_24h: f64 = ledger
            .realized_since(cutoff)
            .iter()
            .map(|t| t.pnl)
            .sum();
        let pnl_24h = realized_24h + ledger.total_unrealized_pnl();
        let daily_loss_frac = if self.starting_equity > 0.0 {
            (-pnl_24h).max(0.0) / self.starting_equity
        } else {
            0.0
        };

        let trades_24h = {
            let times = self.trade_times.read();
            times.iter().filter(|t| **t >= cutoff).count() as u32
        };

        let mut consecutive_losses = 0u32;
        for trade in ledger.recent_realized(64) {
            if trade.pnl < 0.0 {
                consecutive_losses += 1;
            } else {
                break;
            }
        }

        let held: Vec<Pair> = ledger.open_positions().iter().map(|p| p.pair.clone()).collect();
        let observations = self.observations.read();
        let max_held_move_1h = held
            .iter()
            .filter_map(|p| observations.get(p))
            .map(|o| o.move_1h_pct.abs())
            .fold(0.0_f64, f64::max);
        let anomaly = observations
            .values()
            .map(|o| o.anomaly_score)
            .fold(0.0_f64, f64::max);

        RiskInputs {
            daily_loss_frac,
            trades_24h,
            max_held_move_1h,
            consecutive_losses,
            anomaly_score: anomaly,
        }
    }

    /// Update every breaker from explicit inputs (direct entry point for
    /// tests and reactive checks).
    pub fn evaluate_with_inputs(&self, inputs: &RiskInputs) {
        let now = Utc::now();
        let mut breakers = self.breakers.write();
        for breaker in breakers.iter_mut() {
            let value = match breaker.state.name.as_str() {
                "daily_loss" => inputs.daily_loss_frac,
                "trade_frequency" => inputs.trades_24h as f64,
                "volatility" => inputs.max_held_move_1h,
                "consecutive_loss" => inputs.consecutive_losses as f64,
                "anomaly" => inputs.anomaly_score,
                _ => continue,
            };
            if let Some(event) = breaker.update(value, now) {
                self.events.publish(event);
            }
        }
    }

    pub fn any_breaker_tripped(&self) -> bool {
        self.breakers.read().iter().any(|b| b.state.tripped)
    }

    fn tripped_breaker_name(&self) -> Option<String> {
        self.breakers
            .read()
            .iter()
            .find(|b| b.state.tripped)
            .map(|b| b.state.name.clone())
    }

    pub fn breaker_states(&self) -> Vec<BreakerState> {
        self.breakers.read().iter().map(|b| b.state.clone()).collect()
    }

    /// Restore persisted breaker state at startup. A breaker that was
    /// tripped before the restart stays tripped.
    pub fn restore_breakers(&self, states: Vec<BreakerState>) {
        let mut breakers = self.breakers.write();
        for saved in states {
            if let Some(breaker) = breakers
                .iter_mut()
                .find(|b| b.state.name == saved.name)
            {
                let threshold = breaker.state.threshold;
                breaker.state = saved;
                // Config thresholds win over persisted ones.
                breaker.state.threshold = threshold;
            }
        }
    }

    pub fn stop_loss_pct(&self) -> f64 {
        self.risk.read().stop_loss_pct
    }

    pub fn run_when_paused_on_critical(&self) -> bool {
        self.risk.read().run_when_paused_on_critical
    }
}

// ---------------------------------------------------------------------------
// Stop-loss monitor
// ---------------------------------------------------------------------------

/// One sweep over held positions: close any whose price breached its stop.
/// Returns the number of positions closed. Runs between cycles, bypassing
/// the strategist.
pub async fn check_stop_losses(
    sentinel: &Sentinel,
    ledger: &Ledger,
    exchange: &dyn ExchangeApi,
    executor: &Executor,
    events: &EventBus,
    reactive: &mpsc::Sender<()>,
) -> usize {
    let mut closed = 0;

    for position in ledger.open_positions() {
        let Some(stop) = position.stop_loss else {
            continue;
        };

        let price = match exchange.get_ticker(&position.pair).await {
            Ok(ticker) => ticker.price,
            Err(e) => {
                warn!(pair = %position.pair, error = %e, "stop-loss price check failed");
                continue;
            }
        };
        ledger.update_price(&position.pair, price);

        if price > stop {
            continue;
        }

        warn!(
            pair = %position.pair,
            price,
            stop,
            qty = position.quantity_base,
            "stop-loss breached — closing position"
        );
        events.publish(Event::StopLossTriggered {
            pair: position.pair.clone(),
            price,
            stop,
        });

        match executor
            .execute_market_close(OUT_OF_CYCLE, &position.pair, position.quantity_base)
            .await
        {
            Ok(result) => {
                sentinel.record_trade(&position.pair);
                events.publish(Event::DecisionMade {
                    decision: Decision {
                        cycle_id: OUT_OF_CYCLE,
                        pair: position.pair.clone(),
                        action: TradeAction::Sell,
                        size: position.quantity_base,
                        confidence: 1.0,
                        reasoning: "stop-loss".to_string(),
                        analyst_breakdown: Vec::new(),
                        sentinel_verdict: "stop-loss".to_string(),
                        strategist_model: "sentinel".to_string(),
                        order_id: Some(result.order_id.clone()),
                        decided_at: Utc::now(),
                    },
                });
                closed += 1;
                // Nudge the scheduler to run a reactive cycle.
                let _ = reactive.try_send(());
            }
            Err(e) => {
                warn!(pair = %position.pair, error = %e, "stop-loss close failed");
                events.publish(Event::Warning {
                    source: "stop_loss_monitor".to_string(),
                    message: format!("failed to close {}: {e}", position.pair),
                });
            }
        }
    }

    closed
}

/// Background stop-loss loop. Spawned once at engine startup.
pub async fn run_stop_loss_monitor(
    sentinel: Arc<Sentinel>,
    ledger: Arc<Ledger>,
    exchange: Arc<dyn ExchangeApi>,
    executor: Arc<Executor>,
    events: EventBus,
    reactive: mpsc::Sender<()>,
    poll: Duration,
) {
    info!(poll_secs = poll.as_secs(), "stop-loss monitor started");
    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        check_stop_losses(
            &sentinel,
            &ledger,
            exchange.as_ref(),
            &executor,
            &events,
            &reactive,
        )
        .await;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, RiskConfig};
    use crate::ledger::Position;
    use crate::types::Side;
    use std::collections::HashMap as StdHashMap;

    fn pair() -> Pair {
        Pair::new("BTC", "AUD")
    }

    fn sentinel() -> Sentinel {
        Sentinel::new(
            RiskConfig::default(),
            &BreakerConfig::default(),
            1000.0,
            EventBus::new(),
        )
    }

    fn buy_proposal(size: f64, confidence: f64) -> Proposal {
        Proposal {
            action: TradeAction::Buy,
            size,
            confidence,
            reasoning: "test".into(),
            model: "rules".into(),
            fallback: false,
        }
    }

    fn sell_proposal(size: f64) -> Proposal {
        Proposal {
            action: TradeAction::Sell,
            size,
            confidence: 0.9,
            reasoning: "test".into(),
            model: "rules".into(),
            fallback: false,
        }
    }

    fn portfolio(available: f64, position: Option<Position>) -> Portfolio {
        let mut positions = StdHashMap::new();
        let mut total = available;
        if let Some(p) = position {
            total += p.current_value;
            positions.insert(p.pair.to_string(), p);
        }
        Portfolio {
            available_quote: available,
            positions,
            total_value: total,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn low_confidence_is_vetoed() {
        let verdict = sentinel().review(
            &pair(),
            &buy_proposal(100.0, 0.1),
            &portfolio(1000.0, None),
            50_000.0,
        );
        assert!(verdict.is_veto());
    }

    #[test]
    fn cooldown_vetoes_repeat_trades() {
        let s = sentinel();
        s.record_trade(&pair());
        let verdict = s.review(
            &pair(),
            &buy_proposal(100.0, 0.9),
            &portfolio(1000.0, None),
            50_000.0,
        );
        assert!(verdict.is_veto());
        assert!(verdict.label().contains("cooldown"));
    }

    #[test]
    fn oversized_buy_is_resized_to_position_cap() {
        // 20% of 1000 = 200 cap; ask for 543.
        let verdict = sentinel().review(
            &pair(),
            &buy_proposal(543.0, 0.9),
            &portfolio(1000.0, None),
            50_000.0,
        );
        match verdict {
            Verdict::Resize { size, stop_loss, .. } => {
                assert!((size - 200.0).abs() < 1e-9);
                // Stop synthesized at 5% under price.
                assert!((stop_loss.unwrap() - 47_500.0).abs() < 1e-6);
            }
            other => panic!("expected resize, got {other:?}"),
        }
    }

    #[test]
    fn approved_buy_carries_stop_loss() {
        let verdict = sentinel().review(
            &pair(),
            &buy_proposal(100.0, 0.9),
            &portfolio(1000.0, None),
            50_000.0,
        );
        match verdict {
            Verdict::Approve { size, stop_loss } => {
                assert!((size - 100.0).abs() < 1e-12);
                assert!((stop_loss.unwrap() - 47_500.0).abs() < 1e-6);
            }
            other => panic!("expected approve, got {other:?}"),
        }
    }

    #[test]
    fn exhausted_position_headroom_is_vetoed() {
        let position = Position {
            pair: pair(),
            quantity_base: 0.004,
            entry_price: 50_000.0,
            entry_time: Utc::now(),
            stop_loss: None,
            unrealized_pnl: 0.0,
            current_value: 200.0,
        };
        // Position already at the 20% cap of a 1000 portfolio.
        let verdict = sentinel().review(
            &pair(),
            &buy_proposal(50.0, 0.9),
            &portfolio(800.0, Some(position)),
            50_000.0,
        );
        assert!(verdict.is_veto());
        assert!(verdict.label().contains("position cap"));
    }

    #[test]
    fn insufficient_balance_is_vetoed() {
        // 60 available with a 50 reserve leaves 10 of headroom; even after
        // the position cap resizes the buy to 12, the balance rule vetoes.
        let verdict = sentinel().review(
            &pair(),
            &buy_proposal(80.0, 0.9),
            &portfolio(60.0, None),
            50_000.0,
        );
        assert!(verdict.is_veto());
        assert!(verdict.label().contains("available"));
    }

    #[test]
    fn daily_loss_breaker_blocks_buys_allows_risk_off_sells() {
        let s = sentinel();
        // Loss of 100.01 on 1000 equity crosses the 10% threshold.
        s.evaluate_with_inputs(&RiskInputs {
            daily_loss_frac: 0.10001,
            ..Default::default()
        });
        assert!(s.any_breaker_tripped());

        let buy = s.review(
            &pair(),
            &buy_proposal(100.0, 0.9),
            &portfolio(1000.0, None),
            50_000.0,
        );
        assert!(buy.is_veto());
        assert!(buy.label().contains("breaker"));

        // SELL-to-close is still allowed under the default policy flag.
        let sell = s.review(
            &pair(),
            &sell_proposal(0.004),
            &portfolio(1000.0, None),
            50_000.0,
        );
        assert!(!sell.is_veto());
    }

    #[test]
    fn risk_off_sells_can_be_disabled() {
        let mut risk = RiskConfig::default();
        risk.allow_risk_off_sells = false;
        let s = Sentinel::new(risk, &BreakerConfig::default(), 1000.0, EventBus::new());
        s.evaluate_with_inputs(&RiskInputs {
            daily_loss_frac: 0.2,
            ..Default::default()
        });

        let sell = s.review(
            &pair(),
            &sell_proposal(0.004),
            &portfolio(1000.0, None),
            50_000.0,
        );
        assert!(sell.is_veto());
    }

    #[test]
    fn breaker_clears_only_after_recovery_and_cooldown() {
        let mut config = BreakerConfig::default();
        config.cooldown_minutes = 60;
        let s = Sentinel::new(RiskConfig::default(), &config, 1000.0, EventBus::new());

        s.evaluate_with_inputs(&RiskInputs {
            daily_loss_frac: 0.12,
            ..Default::default()
        });
        assert!(s.any_breaker_tripped());

        // Value recovered, but the 60-minute cooldown has not elapsed.
        s.evaluate_with_inputs(&RiskInputs::default());
        assert!(s.any_breaker_tripped());

        // Force the cooldown into the past, then recovery clears it.
        {
            let mut breakers = s.breakers.write();
            for b in breakers.iter_mut() {
                if b.state.tripped {
                    b.state.cooldown_until =
                        Some(Utc::now() - chrono::Duration::minutes(1));
                }
            }
        }
        s.evaluate_with_inputs(&RiskInputs::default());
        assert!(!s.any_breaker_tripped());
    }

    #[test]
    fn value_still_over_threshold_never_clears() {
        let s = sentinel();
        s.evaluate_with_inputs(&RiskInputs {
            daily_loss_frac: 0.12,
            ..Default::default()
        });
        {
            let mut breakers = s.breakers.write();
            for b in breakers.iter_mut() {
                b.state.cooldown_until = Some(Utc::now() - chrono::Duration::minutes(1));
            }
        }
        // Cooldown elapsed but the value is still over.
        s.evaluate_with_inputs(&RiskInputs {
            daily_loss_frac: 0.11,
            ..Default::default()
        });
        assert!(s.any_breaker_tripped());
    }

    #[test]
    fn breaker_state_survives_restore() {
        let s = sentinel();
        s.evaluate_with_inputs(&RiskInputs {
            daily_loss_frac: 0.12,
            ..Default::default()
        });
        let saved = s.breaker_states();

        let restored = sentinel();
        restored.restore_breakers(saved);
        assert!(restored.any_breaker_tripped());
    }

    #[test]
    fn trade_frequency_breaker_counts_trades() {
        let mut config = BreakerConfig::default();
        config.max_daily_trades = 3;
        let s = Sentinel::new(RiskConfig::default(), &config, 1000.0, EventBus::new());

        for _ in 0..3 {
            s.record_trade(&pair());
        }
        let ledger = Ledger::new(1000.0, 4);
        s.evaluate_breakers(&ledger);
        assert!(s.any_breaker_tripped());
    }

    #[test]
    fn anomaly_score_flags_outlier_return() {
        // Gentle noise then a violent jump.
        let mut closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 0.2)
            .collect();
        closes.push(130.0);
        let score = anomaly_score(&closes);
        assert!(score > 4.0, "score={score}");

        // Calm series stays low.
        let calm: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 0.2).collect();
        assert!(anomaly_score(&calm) < 4.0);
    }

    #[test]
    fn anomaly_score_short_series_is_zero() {
        assert!(anomaly_score(&[100.0; 5]).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stop_loss_sweep_closes_breached_position() {
        use crate::config::ExecutionConfig;
        use crate::exchange::{MockExchange, OrderStatus};

        let events = EventBus::new();
        let mut events_rx = events.subscribe();
        let s = sentinel();

        let ledger = Arc::new(Ledger::new(1000.0, 8));
        ledger
            .apply_fill(
                &pair(),
                Side::Buy,
                &crate::exchange::OrderResult {
                    order_id: "SEED".into(),
                    status: OrderStatus::Filled,
                    filled_base: 0.004,
                    filled_quote: 200.0,
                    average_price: 50_000.0,
                    fees: 0.0,
                    exchange_raw: serde_json::Value::Null,
                },
            )
            .unwrap();
        ledger.set_stop_loss(&pair(), 47_500.0);

        // Price ticks through the stop.
        let mock = Arc::new(MockExchange::with_flat_price(pair(), 47_400.0));
        let executor = Executor::new(
            mock.clone(),
            ledger.clone(),
            events.clone(),
            ExecutionConfig {
                order_kind: crate::config::OrderStyle::Market,
                limit_timeout_s: 0,
                poll_ms: 1,
                fallback_to_market: true,
                twap_slices: 1,
                twap_window_s: 0,
            },
        );

        let (reactive_tx, mut reactive_rx) = mpsc::channel(4);
        let closed = check_stop_losses(
            &s,
            &ledger,
            mock.as_ref(),
            &executor,
            &events,
            &reactive_tx,
        )
        .await;

        assert_eq!(closed, 1);
        assert!(ledger.position(&pair()).is_none());
        // Realized loss ≈ (47400*0.9995 - 50000) * 0.004 (sell at bid).
        let realized = ledger.recent_realized(1);
        assert!(realized[0].pnl < -10.0);

        // StopLossTriggered event published and the scheduler nudged.
        let mut saw_stop_loss = false;
        while let Ok(event) = events_rx.try_recv() {
            if event.kind() == "StopLossTriggered" {
                saw_stop_loss = true;
            }
        }
        assert!(saw_stop_loss);
        assert!(reactive_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn stop_loss_sweep_ignores_safe_positions() {
        use crate::config::ExecutionConfig;
        use crate::exchange::{MockExchange, OrderStatus};

        let events = EventBus::new();
        let s = sentinel();
        let ledger = Arc::new(Ledger::new(1000.0, 8));
        ledger
            .apply_fill(
                &pair(),
                Side::Buy,
                &crate::exchange::OrderResult {
                    order_id: "SEED".into(),
                    status: OrderStatus::Filled,
                    filled_base: 0.004,
                    filled_quote: 200.0,
                    average_price: 50_000.0,
                    fees: 0.0,
                    exchange_raw: serde_json::Value::Null,
                },
            )
            .unwrap();
        ledger.set_stop_loss(&pair(), 47_500.0);

        let mock = Arc::new(MockExchange::with_flat_price(pair(), 49_000.0));
        let executor = Executor::new(
            mock.clone(),
            ledger.clone(),
            events.clone(),
            ExecutionConfig::default(),
        );
        let (reactive_tx, _reactive_rx) = mpsc::channel(4);

        let closed = check_stop_losses(
            &s,
            &ledger,
            mock.as_ref(),
            &executor,
            &events,
            &reactive_tx,
        )
        .await;
        assert_eq!(closed, 0);
        assert!(ledger.position(&pair()).is_some());
    }
}
