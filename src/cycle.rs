// =============================================================================
// Decision Cycle — one pass through the full pipeline for all pairs
// =============================================================================
//
// Per pair: market data → analysts → fusion → regime → strategist → sentinel
// → executor → ledger. Pairs are processed sequentially so the ledger stays
// consistent without locks; analysts within a pair fan out concurrently.
//
// Error containment: a failing pair step is recorded and the cycle carries
// on (`status=partial`). Only a ledger invariant violation aborts — the
// abort flag is raised so the scheduler freezes the engine.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysts::{run_analysts, Analyst, CycleContext, FeedStore, Signal};
use crate::config::Config;
use crate::costs::CostTracker;
use crate::events::{Event, EventBus};
use crate::exchange::{ExchangeApi, ExchangeError};
use crate::executor::{ExecError, Executor};
use crate::fanout::Fanout;
use crate::fusion::FusionEngine;
use crate::ledger::{Ledger, Portfolio};
use crate::market_data::{CandleCache, CandleKey, MarketData};
use crate::persistence::{trade_record, Journal, WriteOp};
use crate::regime::RegimeDetector;
use crate::sentinel::{anomaly_score, MarketObservation, Sentinel};
use crate::strategist::Strategist;
use crate::types::{CycleStatus, CycleTrigger, Pair, TradeAction};

/// Candle interval fetched per pair.
const CANDLE_INTERVAL_MINUTES: u32 = 60;
/// Candle window requested per cycle.
const CANDLE_WINDOW: usize = 120;
/// Per-analyst evaluation timeout.
const ANALYST_TIMEOUT: Duration = Duration::from_secs(10);
/// Transient I/O retry attempts per call.
const IO_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One immutable journaled decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub cycle_id: u64,
    pub pair: Pair,
    pub action: TradeAction,
    pub size: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub analyst_breakdown: Vec<Signal>,
    pub sentinel_verdict: String,
    pub strategist_model: String,
    pub order_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// The write-once record of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub cycle_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trigger: CycleTrigger,
    pub decisions: Vec<Decision>,
    pub portfolio_before: Portfolio,
    pub portfolio_after: Portfolio,
    pub status: CycleStatus,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Everything a cycle needs, bundled once at startup.
pub struct CycleDeps {
    pub config: Arc<RwLock<Config>>,
    pub exchange: Arc<dyn ExchangeApi>,
    pub ledger: Arc<Ledger>,
    pub candles: Arc<CandleCache>,
    pub analysts: Vec<Arc<dyn Analyst>>,
    pub fusion: Arc<FusionEngine>,
    pub regime: Arc<RegimeDetector>,
    pub strategist: Arc<Strategist>,
    pub sentinel: Arc<Sentinel>,
    pub executor: Arc<Executor>,
    pub events: EventBus,
    pub journal: Journal,
    pub fanout: Arc<Fanout>,
    pub feeds: Arc<FeedStore>,
    pub costs: Arc<CostTracker>,
    /// Raised by stop()/emergency_stop; polled between per-pair steps.
    pub abort: Arc<AtomicBool>,
}

enum StepError {
    /// Pair step failed; the cycle continues with the remaining pairs.
    Recoverable(String),
    /// Ledger invariant violated; the engine must freeze.
    Invariant(String),
}

// ---------------------------------------------------------------------------
// Cycle driver
// ---------------------------------------------------------------------------

/// Run one full cycle. Never panics; all failure modes land in the record.
pub async fn run_cycle(deps: &CycleDeps, cycle_id: u64, trigger: CycleTrigger) -> CycleRecord {
    let started_at = Utc::now();
    info!(cycle_id, trigger = %trigger, "cycle started");
    deps.events.publish(Event::CycleStarted { cycle_id, trigger });

    let portfolio_before = deps.ledger.snapshot();
    let pairs = deps.config.read().pair_list();

    let mut decisions: Vec<Decision> = Vec::new();
    let mut failures: Vec<String> = Vec::new();
    let mut invariant: Option<String> = None;
    let mut aborted = false;

    for pair in &pairs {
        // Safe yield point: cancellation is honored between per-pair steps.
        if deps.abort.load(Ordering::SeqCst) {
            aborted = true;
            break;
        }

        match run_pair_step(deps, cycle_id, pair).await {
            Ok(decision) => {
                deps.events.publish(Event::DecisionMade {
                    decision: decision.clone(),
                });
                decisions.push(decision);
            }
            Err(StepError::Recoverable(message)) => {
                warn!(cycle_id, pair = %pair, error = %message, "pair step failed");
                deps.events.publish(Event::Warning {
                    source: format!("cycle:{pair}"),
                    message: message.clone(),
                });
                failures.push(message);
            }
            Err(StepError::Invariant(message)) => {
                invariant = Some(message);
                break;
            }
        }
    }

    // Breakers see the post-trade ledger; state is persisted every cycle so
    // tripped breakers survive restarts.
    deps.sentinel.evaluate_breakers(&deps.ledger);
    deps.journal
        .submit(WriteOp::Breakers(deps.sentinel.breaker_states()));

    let portfolio_after = deps.ledger.snapshot();
    deps.journal
        .submit(WriteOp::Snapshot(portfolio_after.clone()));
    deps.fanout.broadcast(&portfolio_after);

    let (status, error) = if let Some(message) = invariant {
        // Freeze the engine; the scheduler reacts to the raised flag.
        deps.abort.store(true, Ordering::SeqCst);
        deps.events.publish(Event::Warning {
            source: "cycle".to_string(),
            message: format!("invariant violation: {message}"),
        });
        (CycleStatus::Failed, Some(message))
    } else if aborted {
        (CycleStatus::Aborted, Some("cycle aborted by stop".to_string()))
    } else if !failures.is_empty() {
        (CycleStatus::Partial, Some(failures.join("; ")))
    } else {
        (CycleStatus::Ok, None)
    };

    deps.events.publish(Event::CycleFinished {
        cycle_id,
        status,
        decisions: decisions.len(),
    });
    info!(
        cycle_id,
        status = %status,
        decisions = decisions.len(),
        "cycle finished"
    );

    CycleRecord {
        cycle_id,
        started_at,
        finished_at: Utc::now(),
        trigger,
        decisions,
        portfolio_before,
        portfolio_after,
        status,
        error,
    }
}

// ---------------------------------------------------------------------------
// Per-pair step
// ---------------------------------------------------------------------------

async fn run_pair_step(
    deps: &CycleDeps,
    cycle_id: u64,
    pair: &Pair,
) -> Result<Decision, StepError> {
    // ── 1. Market data ───────────────────────────────────────────────────
    let market = fetch_market_data(deps, pair)
        .await
        .map_err(|e| StepError::Recoverable(format!("market data: {e}")))?;
    deps.ledger.update_price(pair, market.last_price());

    // Observations for the volatility and anomaly breakers.
    let closes = market.closes();
    let move_1h = one_hour_move(&closes);
    let score = anomaly_score(&closes);
    deps.sentinel.observe_market(
        pair,
        MarketObservation {
            move_1h_pct: move_1h,
            anomaly_score: score,
        },
    );
    let anomaly_threshold = deps.config.read().breakers.anomaly_threshold;
    if score >= anomaly_threshold {
        deps.journal.submit(WriteOp::Anomaly {
            pair: pair.clone(),
            score,
            threshold: anomaly_threshold,
        });
    }

    // ── 2. Regime ────────────────────────────────────────────────────────
    let regime_reading = deps.regime.classify(pair, &market.candles);
    deps.journal.submit(WriteOp::RegimeSnapshot {
        pair: pair.clone(),
        reading: regime_reading.clone(),
    });

    // ── 3. Analysts (bounded concurrent fan-out) ─────────────────────────
    let ctx = {
        let config = deps.config.read();
        CycleContext {
            feeds: deps.feeds.snapshot(),
            stale_after: chrono::Duration::minutes(config.feeds.stale_after_minutes as i64),
            news_weight: config.feeds.news_weight,
            now: Utc::now(),
        }
    };
    let signals = run_analysts(&deps.analysts, pair, &market, &ctx, ANALYST_TIMEOUT).await;
    for signal in &signals {
        deps.events.publish(Event::SignalEmitted {
            cycle_id,
            signal: signal.clone(),
        });
        deps.journal.submit(WriteOp::Signal {
            cycle_id,
            signal: signal.clone(),
            regime: Some(regime_reading.regime),
            anomaly_score: Some(score),
        });
    }

    // ── 4. Fusion ────────────────────────────────────────────────────────
    let Some(fused) = deps
        .fusion
        .fuse(pair, signals, regime_reading.regime)
    else {
        debug!(cycle_id, pair = %pair, "every analyst abstained");
        return Ok(hold_decision(
            cycle_id,
            pair,
            "no active signals",
            Vec::new(),
        ));
    };

    // Score last cycle's calls against the realized move and upsert the
    // touched weight rows.
    for row in deps
        .fusion
        .score_and_note(pair, market.last_price(), &fused)
    {
        deps.journal.submit(WriteOp::Weight(row));
    }

    // ── 5. Strategist ────────────────────────────────────────────────────
    let portfolio = deps.ledger.snapshot();
    let recent = deps.ledger.recent_realized(5);
    let base_order_quote = deps.config.read().strategist.base_order_quote;
    let proposal = deps
        .strategist
        .propose(pair, &fused, &portfolio, &recent, base_order_quote, cycle_id)
        .await;

    if proposal.action == TradeAction::Hold {
        return Ok(Decision {
            cycle_id,
            pair: pair.clone(),
            action: TradeAction::Hold,
            size: 0.0,
            confidence: proposal.confidence,
            reasoning: proposal.reasoning,
            analyst_breakdown: fused.contributing,
            sentinel_verdict: "not reviewed".to_string(),
            strategist_model: proposal.model,
            order_id: None,
            decided_at: Utc::now(),
        });
    }

    // ── 6. Sentinel ──────────────────────────────────────────────────────
    let verdict = deps
        .sentinel
        .review(pair, &proposal, &portfolio, market.last_price());

    let Some(size) = verdict.approved_size() else {
        // Rejected decision: journaled, cycle proceeds.
        return Ok(Decision {
            cycle_id,
            pair: pair.clone(),
            action: proposal.action,
            size: proposal.size,
            confidence: proposal.confidence,
            reasoning: proposal.reasoning,
            analyst_breakdown: fused.contributing,
            sentinel_verdict: verdict.label(),
            strategist_model: proposal.model,
            order_id: None,
            decided_at: Utc::now(),
        });
    };

    // ── 7. Executor ──────────────────────────────────────────────────────
    let Some(side) = proposal.action.side() else {
        return Ok(hold_decision(cycle_id, pair, "nothing to execute", fused.contributing));
    };
    let decision_ts = Utc::now().timestamp_millis();

    let result = match deps.executor.execute(cycle_id, pair, side, size).await {
        Ok(result) => result,
        Err(ExecError::Ledger(e)) => {
            return Err(StepError::Invariant(e.to_string()));
        }
        Err(ExecError::Exchange(e)) => {
            // Filter rejections are decision-local vetoes; the rest fail the
            // pair step.
            if let ExchangeError::FilterRejected(reason) = &e {
                return Ok(Decision {
                    cycle_id,
                    pair: pair.clone(),
                    action: proposal.action,
                    size,
                    confidence: proposal.confidence,
                    reasoning: proposal.reasoning,
                    analyst_breakdown: fused.contributing,
                    sentinel_verdict: format!("veto: exchange filter ({reason})"),
                    strategist_model: proposal.model,
                    order_id: None,
                    decided_at: Utc::now(),
                });
            }
            return Err(StepError::Recoverable(format!("execution: {e}")));
        }
    };

    // ── 8. Post-trade bookkeeping ────────────────────────────────────────
    if side == crate::types::Side::Buy
        && result.average_price > 0.0
        && verdict.stop_loss().is_some()
    {
        // Re-anchor the stop to the actual fill price.
        let pct = deps.sentinel.stop_loss_pct();
        deps.ledger
            .set_stop_loss(pair, result.average_price * (1.0 - pct));
    }
    deps.sentinel.record_trade(pair);

    let realized = if side == crate::types::Side::Sell {
        deps.ledger.recent_realized(1).first().map(|t| t.pnl)
    } else {
        None
    };
    let entry_price = deps.ledger.position(pair).map(|p| p.entry_price);
    deps.journal.submit(WriteOp::Trade(trade_record(
        &result.order_id,
        pair,
        &proposal.action.to_string(),
        size,
        &result,
        &format!("{:?}", deps.config.read().execution.order_kind),
        entry_price,
        realized,
        decision_ts,
    )));
    deps.journal.submit(WriteOp::ExecutionQuality {
        order_id: result.order_id.clone(),
        pair: pair.clone(),
        strategy: format!("{:?}", deps.config.read().execution.order_kind),
        slippage_bps: slippage_bps(market.last_price(), result.average_price),
        latency_ms: Some((Utc::now().timestamp_millis() - decision_ts).max(0)),
    });

    Ok(Decision {
        cycle_id,
        pair: pair.clone(),
        action: proposal.action,
        size,
        confidence: proposal.confidence,
        reasoning: proposal.reasoning,
        analyst_breakdown: fused.contributing,
        sentinel_verdict: verdict.label(),
        strategist_model: proposal.model,
        order_id: Some(result.order_id),
        decided_at: Utc::now(),
    })
}

fn hold_decision(
    cycle_id: u64,
    pair: &Pair,
    reasoning: &str,
    breakdown: Vec<Signal>,
) -> Decision {
    Decision {
        cycle_id,
        pair: pair.clone(),
        action: TradeAction::Hold,
        size: 0.0,
        confidence: 0.0,
        reasoning: reasoning.to_string(),
        analyst_breakdown: breakdown,
        sentinel_verdict: "not reviewed".to_string(),
        strategist_model: "none".to_string(),
        order_id: None,
        decided_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Market data assembly
// ---------------------------------------------------------------------------

async fn fetch_market_data(deps: &CycleDeps, pair: &Pair) -> Result<MarketData, ExchangeError> {
    let exchange = &deps.exchange;

    let ticker = with_retry(|| exchange.get_ticker(pair)).await?;
    let fetched =
        with_retry(|| exchange.get_ohlcv(pair, CANDLE_INTERVAL_MINUTES, CANDLE_WINDOW)).await?;
    let order_book = with_retry(|| exchange.get_order_book(pair, 10)).await?;

    // Merge into the bounded cache; analysts see the cached window so short
    // fetch gaps do not blind the indicators.
    let key = CandleKey {
        pair: pair.clone(),
        interval_minutes: CANDLE_INTERVAL_MINUTES,
    };
    deps.candles.merge(key.clone(), &fetched);
    let candles = deps.candles.window(&key, CANDLE_WINDOW);

    Ok(MarketData {
        pair: pair.clone(),
        ticker,
        candles,
        order_book,
        fetched_at: Utc::now(),
    })
}

/// Bounded exponential backoff over transient failures.
async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExchangeError>>,
{
    let mut backoff = Duration::from_millis(200);
    let mut last = None;
    for attempt in 1..=IO_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < IO_ATTEMPTS => {
                debug!(attempt, error = %e, "transient I/O failure — backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| ExchangeError::Unknown("retries exhausted".into())))
}

/// Fractional move between the last two hourly closes.
fn one_hour_move(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let prev = closes[closes.len() - 2];
    let last = closes[closes.len() - 1];
    if prev == 0.0 {
        return 0.0;
    }
    (last - prev) / prev
}

fn slippage_bps(reference: f64, fill: f64) -> Option<f64> {
    if reference <= 0.0 || fill <= 0.0 {
        return None;
    }
    Some(((fill - reference) / reference).abs() * 10_000.0)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysts::analyst_set;
    use crate::config::{ExchangeSelector, OrderStyle, Stage};
    use crate::exchange::{MockExchange, Ticker};
    use crate::fusion::WeightBook;
    use crate::market_data::Candle;
    use crate::persistence::Store;
    use crate::regime::RegimeDetector;

    fn pair() -> Pair {
        Pair::new("BTC", "AUD")
    }

    /// 100 flat candles then a slow bleed: SMA gap stays inside the
    /// crossover band while RSI pins deeply oversold.
    fn oversold_candles(price: f64) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..100)
            .map(|i| Candle {
                timestamp: i * 3_600_000,
                open: price,
                high: price + 1.0,
                low: price - 1.0,
                close: price,
                volume: 10.0,
            })
            .collect();
        for i in 0..20 {
            let close = price - (i as f64 + 1.0) * 0.5;
            candles.push(Candle {
                timestamp: (100 + i) * 3_600_000,
                open: close + 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            });
        }
        candles
    }

    fn flat_ticker(price: f64) -> Ticker {
        Ticker {
            price,
            bid: price,
            ask: price,
            high_24h: price,
            low_24h: price,
            volume_24h: 1000.0,
        }
    }

    async fn deps_with(mock: Arc<MockExchange>, config: Config) -> CycleDeps {
        let events = EventBus::new();
        let ledger = Arc::new(Ledger::new(config.initial_capital, 16));
        let costs = Arc::new(CostTracker::new(config.strategist.daily_budget_usd));
        let sentinel = Arc::new(Sentinel::new(
            config.risk.clone(),
            &config.breakers,
            config.initial_capital,
            events.clone(),
        ));
        let executor = Arc::new(Executor::new(
            mock.clone(),
            ledger.clone(),
            events.clone(),
            config.execution.clone(),
        ));
        let store = Arc::new(Store::open_in_memory().unwrap());
        let journal = Journal::spawn(store, 64, events.clone());
        let strategist = Arc::new(Strategist::new(&config, costs.clone()));
        let stage = config.stage;

        CycleDeps {
            config: Arc::new(RwLock::new(config)),
            exchange: mock,
            ledger,
            candles: Arc::new(CandleCache::new(256)),
            analysts: analyst_set(stage),
            fusion: Arc::new(FusionEngine::new(WeightBook::seeded(), 0.5)),
            regime: Arc::new(RegimeDetector::new(Duration::from_secs(0))),
            strategist,
            sentinel,
            executor,
            events,
            journal,
            fanout: Arc::new(Fanout::new(true, 8)),
            feeds: Arc::new(FeedStore::new()),
            costs,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    fn seed_config() -> Config {
        let mut config = Config::default();
        config.exchange = ExchangeSelector::Mock;
        config.pairs = vec!["BTC/AUD".to_string()];
        config.stage = Stage::Stage1;
        config.initial_capital = 1000.0;
        config.risk.max_position_pct = 0.20;
        config.risk.stop_loss_pct = 0.05;
        config.strategist.base_order_quote = 1000.0;
        config.execution.order_kind = OrderStyle::Market;
        config.execution.poll_ms = 1;
        config
    }

    #[tokio::test]
    async fn simulated_buy_cycle_seeds_expected_position() {
        // Flat 50k feed, deeply oversold technicals, extreme fear at 15:
        // one BUY for 200 AUD of BTC, post-ledger 800 available, 0.004 BTC,
        // stop at 47500.
        let mock = Arc::new(MockExchange::new());
        mock.set_ticker(pair(), flat_ticker(50_000.0));
        mock.set_candles(pair(), oversold_candles(50_000.0));

        let deps = deps_with(mock, seed_config()).await;
        deps.feeds.set_fear_greed(15.0);

        let record = run_cycle(&deps, 1, CycleTrigger::Scheduled).await;

        assert_eq!(record.status, CycleStatus::Ok);
        assert_eq!(record.decisions.len(), 1);
        let decision = &record.decisions[0];
        assert_eq!(decision.action, TradeAction::Buy);
        assert!((decision.size - 200.0).abs() < 1e-6, "size={}", decision.size);
        assert!(decision.order_id.is_some());
        assert_eq!(decision.analyst_breakdown.len(), 2);

        let portfolio = &record.portfolio_after;
        assert!((portfolio.available_quote - 800.0).abs() < 1e-6);
        let position = portfolio.position(&pair()).unwrap();
        assert!((position.quantity_base - 0.004).abs() < 1e-9);
        assert!((position.stop_loss.unwrap() - 47_500.0).abs() < 1e-6);

        // Value invariant holds.
        assert!(
            (portfolio.total_value
                - (portfolio.available_quote + position.current_value))
                .abs()
                < 1e-6
        );
    }

    #[tokio::test]
    async fn tripped_breaker_vetoes_buy_decision() {
        let mock = Arc::new(MockExchange::new());
        mock.set_ticker(pair(), flat_ticker(50_000.0));
        mock.set_candles(pair(), oversold_candles(50_000.0));

        let deps = deps_with(mock.clone(), seed_config()).await;
        deps.feeds.set_fear_greed(15.0);
        deps.sentinel
            .evaluate_with_inputs(&crate::sentinel::RiskInputs {
                daily_loss_frac: 0.12,
                ..Default::default()
            });

        let record = run_cycle(&deps, 1, CycleTrigger::Scheduled).await;
        assert_eq!(record.status, CycleStatus::Ok);
        let decision = &record.decisions[0];
        assert_eq!(decision.action, TradeAction::Buy);
        assert!(decision.sentinel_verdict.contains("breaker"));
        assert!(decision.order_id.is_none());
        // No order reached the exchange.
        assert_eq!(mock.placed_count(), 0);
    }

    #[tokio::test]
    async fn failing_pair_yields_partial_cycle() {
        let mock = Arc::new(MockExchange::new());
        // ETH has data; BTC has none, so its step fails on market data.
        let eth = Pair::new("ETH", "AUD");
        mock.set_ticker(eth.clone(), flat_ticker(3000.0));
        mock.set_candles(eth.clone(), oversold_candles(3000.0));

        let mut config = seed_config();
        config.pairs = vec!["BTC/AUD".to_string(), "ETH/AUD".to_string()];
        let deps = deps_with(mock, config).await;
        deps.feeds.set_fear_greed(15.0);

        let record = run_cycle(&deps, 1, CycleTrigger::Manual).await;
        assert_eq!(record.status, CycleStatus::Partial);
        assert!(record.error.is_some());
        // The healthy pair still produced a decision.
        assert_eq!(record.decisions.len(), 1);
        assert_eq!(record.decisions[0].pair, eth);
    }

    #[tokio::test]
    async fn all_analysts_abstaining_holds() {
        let mock = Arc::new(MockExchange::new());
        mock.set_ticker(pair(), flat_ticker(50_000.0));
        // Too few candles for the technical analyst; no feeds at all.
        mock.set_flat_candles(pair(), 50_000.0, 10);

        let deps = deps_with(mock, seed_config()).await;
        let record = run_cycle(&deps, 1, CycleTrigger::Scheduled).await;

        assert_eq!(record.status, CycleStatus::Ok);
        assert_eq!(record.decisions.len(), 1);
        assert_eq!(record.decisions[0].action, TradeAction::Hold);
        assert_eq!(record.decisions[0].reasoning, "no active signals");
    }

    #[tokio::test]
    async fn abort_flag_stops_between_pairs() {
        let mock = Arc::new(MockExchange::new());
        mock.set_ticker(pair(), flat_ticker(50_000.0));
        mock.set_candles(pair(), oversold_candles(50_000.0));

        let deps = deps_with(mock, seed_config()).await;
        deps.abort.store(true, Ordering::SeqCst);

        let record = run_cycle(&deps, 1, CycleTrigger::Scheduled).await;
        assert_eq!(record.status, CycleStatus::Aborted);
        assert!(record.decisions.is_empty());
    }

    #[test]
    fn one_hour_move_math() {
        assert!((one_hour_move(&[100.0, 108.0]) - 0.08).abs() < 1e-12);
        assert!(one_hour_move(&[100.0]).abs() < f64::EPSILON);
    }
}
