// =============================================================================
// Configuration — eagerly validated engine settings with atomic save
// =============================================================================
//
// A single `Config` struct loaded at startup. Every field carries a serde
// default so older JSON files keep loading when new fields are added.
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
//
// Runtime mutation is restricted to an explicit `apply_patch` operation that
// touches only analyst weights, risk/breaker thresholds, and strategist mode.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::Pair;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_quote_currency() -> String {
    "AUD".to_string()
}

fn default_pairs() -> Vec<String> {
    vec!["BTC/AUD".to_string(), "ETH/AUD".to_string()]
}

fn default_cycle_interval_minutes() -> u64 {
    15
}

fn default_initial_capital() -> f64 {
    1000.0
}

fn default_target_capital() -> f64 {
    2000.0
}

fn default_max_position_pct() -> f64 {
    0.20
}

fn default_max_exposure_pct() -> f64 {
    0.60
}

fn default_stop_loss_pct() -> f64 {
    0.05
}

fn default_min_confidence() -> f64 {
    0.35
}

fn default_min_hold_time_hours() -> f64 {
    4.0
}

fn default_reserve_quote() -> f64 {
    50.0
}

fn default_max_daily_loss_pct() -> f64 {
    0.10
}

fn default_max_daily_trades() -> u32 {
    20
}

fn default_volatility_threshold_pct() -> f64 {
    0.08
}

fn default_consecutive_loss_limit() -> u32 {
    4
}

fn default_anomaly_threshold() -> f64 {
    4.0
}

fn default_breaker_cooldown_minutes() -> u64 {
    60
}

fn default_limit_timeout_s() -> u64 {
    90
}

fn default_poll_ms() -> u64 {
    1500
}

fn default_twap_slices() -> u32 {
    4
}

fn default_twap_window_s() -> u64 {
    600
}

fn default_disagreement_penalty() -> f64 {
    0.5
}

fn default_threshold_buy() -> f64 {
    0.25
}

fn default_base_order_quote() -> f64 {
    250.0
}

fn default_min_order_quote() -> f64 {
    20.0
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_s() -> u64 {
    20
}

fn default_daily_budget_usd() -> f64 {
    5.0
}

fn default_feed_stale_minutes() -> u64 {
    120
}

fn default_news_weight() -> f64 {
    0.5
}

fn default_db_path() -> String {
    "meridian.db".to_string()
}

fn default_write_deadline_ms() -> u64 {
    250
}

fn default_persist_queue_capacity() -> usize {
    512
}

fn default_snapshot_retention() -> usize {
    64
}

fn default_slow_consumer_threshold() -> u32 {
    8
}

// =============================================================================
// Selector enums
// =============================================================================

/// Which exchange adapter to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeSelector {
    Real,
    Simulation,
    Mock,
}

impl Default for ExchangeSelector {
    fn default() -> Self {
        Self::Simulation
    }
}

/// Rollout stage — selects the analyst set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Stage1,
    Stage2,
    Stage3,
}

impl Default for Stage {
    fn default() -> Self {
        Self::Stage1
    }
}

/// Strategist operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategistMode {
    Rules,
    Llm,
    Hybrid,
}

impl Default for StrategistMode {
    fn default() -> Self {
        Self::Rules
    }
}

/// Preferred order placement style for strategist-initiated trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStyle {
    Market,
    Limit,
    Twap,
}

impl Default for OrderStyle {
    fn default() -> Self {
        Self::Limit
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Position/exposure caps and stop-loss rules applied by the risk sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum single-position value as a fraction of total portfolio value.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    /// Maximum total invested value as a fraction of total portfolio value.
    #[serde(default = "default_max_exposure_pct")]
    pub max_exposure_pct: f64,

    /// Stop-loss distance below entry as a fraction (0.05 = 5 %).
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Proposals below this confidence are vetoed.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum hours between trades on the same pair.
    #[serde(default = "default_min_hold_time_hours")]
    pub min_hold_time_hours: f64,

    /// Quote balance kept untouchable by BUY orders.
    #[serde(default = "default_reserve_quote")]
    pub reserve_quote: f64,

    /// Whether SELL-to-close orders are still allowed while a breaker is
    /// tripped.
    #[serde(default = "default_true")]
    pub allow_risk_off_sells: bool,

    /// Whether a stop-loss breach or breaker trip may run a reactive cycle
    /// while the scheduler is paused.
    #[serde(default = "default_true")]
    pub run_when_paused_on_critical: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: default_max_position_pct(),
            max_exposure_pct: default_max_exposure_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            min_confidence: default_min_confidence(),
            min_hold_time_hours: default_min_hold_time_hours(),
            reserve_quote: default_reserve_quote(),
            allow_risk_off_sells: true,
            run_when_paused_on_critical: true,
        }
    }
}

/// Thresholds for the circuit-breaker family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Rolling-24h loss fraction of starting equity that trips `daily_loss`.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Trade count over 24 h that trips `trade_frequency`.
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    /// 1 h price move fraction on any held pair that trips `volatility`.
    #[serde(default = "default_volatility_threshold_pct")]
    pub volatility_threshold_pct: f64,

    /// Consecutive losing trades that trip `consecutive_loss`.
    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,

    /// Anomaly score at or above which `anomaly` trips.
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Minutes a tripped breaker stays latched after its value recovers.
    #[serde(default = "default_breaker_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_daily_trades: default_max_daily_trades(),
            volatility_threshold_pct: default_volatility_threshold_pct(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
            anomaly_threshold: default_anomaly_threshold(),
            cooldown_minutes: default_breaker_cooldown_minutes(),
        }
    }
}

/// Order placement behaviour for the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub order_kind: OrderStyle,

    /// Seconds a limit order may rest before cancellation.
    #[serde(default = "default_limit_timeout_s")]
    pub limit_timeout_s: u64,

    /// Fill-poll interval for resting orders.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    /// Whether the unfilled remainder of a timed-out limit order is chased
    /// with a market order.
    #[serde(default = "default_true")]
    pub fallback_to_market: bool,

    /// Number of child orders a TWAP parent is split into.
    #[serde(default = "default_twap_slices")]
    pub twap_slices: u32,

    /// Window over which TWAP children are spread.
    #[serde(default = "default_twap_window_s")]
    pub twap_window_s: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_kind: OrderStyle::default(),
            limit_timeout_s: default_limit_timeout_s(),
            poll_ms: default_poll_ms(),
            fallback_to_market: true,
            twap_slices: default_twap_slices(),
            twap_window_s: default_twap_window_s(),
        }
    }
}

/// Analyst weighting for the fusion engine. `default_weights` applies when no
/// regime-specific row exists; `regime_weights` is keyed by the regime's
/// canonical name (e.g. "TRENDING_UP").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_disagreement_penalty")]
    pub disagreement_penalty: f64,

    #[serde(default)]
    pub default_weights: HashMap<String, f64>,

    #[serde(default)]
    pub regime_weights: HashMap<String, HashMap<String, f64>>,
}

/// Strategist tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategistConfig {
    #[serde(default)]
    pub mode: StrategistMode,

    /// Fused direction at or above which the rule strategist buys
    /// (symmetric for sells).
    #[serde(default = "default_threshold_buy")]
    pub threshold_buy: f64,

    /// Base quote size scaled by fused confidence.
    #[serde(default = "default_base_order_quote")]
    pub base_order_quote: f64,

    /// Proposals are never sized below this quote amount.
    #[serde(default = "default_min_order_quote")]
    pub min_order_quote: f64,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_llm_timeout_s")]
    pub llm_timeout_s: u64,

    /// Daily LLM spend ceiling; exceeding it forces rules mode.
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,
}

impl Default for StrategistConfig {
    fn default() -> Self {
        Self {
            mode: StrategistMode::default(),
            threshold_buy: default_threshold_buy(),
            base_order_quote: default_base_order_quote(),
            min_order_quote: default_min_order_quote(),
            llm_model: default_llm_model(),
            llm_timeout_s: default_llm_timeout_s(),
            daily_budget_usd: default_daily_budget_usd(),
        }
    }
}

/// External feed handling for the sentiment/on-chain/macro analysts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Readings older than this are treated as stale (analyst returns
    /// confidence 0).
    #[serde(default = "default_feed_stale_minutes")]
    pub stale_after_minutes: u64,

    /// Headline polarity blend weight against the Fear & Greed index.
    #[serde(default = "default_news_weight")]
    pub news_weight: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: default_feed_stale_minutes(),
            news_weight: default_news_weight(),
        }
    }
}

/// Durable store and snapshot retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Writes queued longer than this are considered late; the queue itself
    /// never blocks the decision path.
    #[serde(default = "default_write_deadline_ms")]
    pub write_deadline_ms: u64,

    #[serde(default = "default_persist_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of in-memory portfolio snapshots retained by the ledger.
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            write_deadline_ms: default_write_deadline_ms(),
            queue_capacity: default_persist_queue_capacity(),
            snapshot_retention: default_snapshot_retention(),
        }
    }
}

/// Live portfolio fan-out behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default = "default_true")]
    pub realtime_fanout_enabled: bool,

    /// Consecutive missed broadcasts after which a slow subscriber is dropped.
    #[serde(default = "default_slow_consumer_threshold")]
    pub slow_consumer_threshold: u32,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            realtime_fanout_enabled: true,
            slow_consumer_threshold: default_slow_consumer_threshold(),
        }
    }
}

/// Secrets sourced from the environment only — never serialized to disk.
#[derive(Clone, Default)]
pub struct Credentials {
    pub exchange_key: Option<String>,
    pub exchange_secret: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_api_url: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let get = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        Self {
            exchange_key: get("MERIDIAN_EXCHANGE_KEY"),
            exchange_secret: get("MERIDIAN_EXCHANGE_SECRET"),
            llm_api_key: get("MERIDIAN_LLM_KEY"),
            llm_api_url: get("MERIDIAN_LLM_URL"),
        }
    }

    pub fn has_exchange(&self) -> bool {
        self.exchange_key.is_some() && self.exchange_secret.is_some()
    }

    pub fn has_llm(&self) -> bool {
        self.llm_api_key.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("exchange_key", &self.exchange_key.as_ref().map(|_| "<redacted>"))
            .field("exchange_secret", &self.exchange_secret.as_ref().map(|_| "<redacted>"))
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .field("llm_api_url", &self.llm_api_url)
            .finish()
    }
}

// =============================================================================
// Config
// =============================================================================

/// Top-level configuration for the Meridian core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeSelector,

    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,

    /// Pairs traded this stage, canonical `BASE/QUOTE` form.
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,

    #[serde(default)]
    pub stage: Stage,

    #[serde(default = "default_cycle_interval_minutes")]
    pub cycle_interval_minutes: u64,

    /// Forces the simulation adapter regardless of the selector.
    #[serde(default)]
    pub simulation_mode: bool,

    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    #[serde(default = "default_target_capital")]
    pub target_capital: f64,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub breakers: BreakerConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub strategist: StrategistConfig,

    #[serde(default)]
    pub feeds: FeedConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub fanout: FanoutConfig,

    #[serde(skip)]
    pub credentials: Credentials,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeSelector::default(),
            quote_currency: default_quote_currency(),
            pairs: default_pairs(),
            stage: Stage::default(),
            cycle_interval_minutes: default_cycle_interval_minutes(),
            simulation_mode: false,
            initial_capital: default_initial_capital(),
            target_capital: default_target_capital(),
            risk: RiskConfig::default(),
            breakers: BreakerConfig::default(),
            execution: ExecutionConfig::default(),
            fusion: FusionConfig::default(),
            strategist: StrategistConfig::default(),
            feeds: FeedConfig::default(),
            persistence: PersistenceConfig::default(),
            fanout: FanoutConfig::default(),
            credentials: Credentials::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, then apply environment overrides
    /// and pick up credentials. A missing file is an error so the caller can
    /// decide whether defaults are acceptable.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        config.apply_env();

        info!(
            path = %path.display(),
            exchange = ?config.exchange,
            stage = ?config.stage,
            pairs = ?config.pairs,
            "config loaded"
        );

        Ok(config)
    }

    /// Apply the recognized environment overrides. Unparseable values are
    /// ignored with a warning rather than failing startup.
    pub fn apply_env(&mut self) {
        if let Ok(stage) = std::env::var("STAGE") {
            match stage.to_lowercase().as_str() {
                "stage1" | "1" => self.stage = Stage::Stage1,
                "stage2" | "2" => self.stage = Stage::Stage2,
                "stage3" | "3" => self.stage = Stage::Stage3,
                other => warn!(value = %other, "unrecognized STAGE override ignored"),
            }
        }

        if let Ok(sim) = std::env::var("SIMULATION_MODE") {
            match sim.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.simulation_mode = true,
                "0" | "false" | "no" => self.simulation_mode = false,
                other => warn!(value = %other, "unrecognized SIMULATION_MODE override ignored"),
            }
        }

        if let Ok(ex) = std::env::var("EXCHANGE") {
            match ex.to_lowercase().as_str() {
                "real" => self.exchange = ExchangeSelector::Real,
                "simulation" => self.exchange = ExchangeSelector::Simulation,
                "mock" => self.exchange = ExchangeSelector::Mock,
                other => warn!(value = %other, "unrecognized EXCHANGE override ignored"),
            }
        }

        if let Ok(mins) = std::env::var("CYCLE_INTERVAL_MINUTES") {
            match mins.parse::<u64>() {
                Ok(v) if v > 0 => self.cycle_interval_minutes = v,
                _ => warn!(value = %mins, "invalid CYCLE_INTERVAL_MINUTES override ignored"),
            }
        }

        if let Ok(pairs) = std::env::var("MERIDIAN_PAIRS") {
            let parsed: Vec<String> = pairs
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.pairs = parsed;
            }
        }

        self.credentials = Credentials::from_env();
    }

    /// Eager validation. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.pairs.is_empty() {
            bail!("no trading pairs configured");
        }
        for raw in &self.pairs {
            let pair = Pair::parse(raw)
                .with_context(|| format!("invalid pair '{raw}' (expected BASE/QUOTE)"))?;
            if pair.quote != self.quote_currency.to_uppercase() {
                bail!(
                    "pair {} does not match quote currency {}",
                    pair,
                    self.quote_currency
                );
            }
        }
        if self.cycle_interval_minutes == 0 {
            bail!("cycle_interval_minutes must be positive");
        }
        if self.initial_capital <= 0.0 {
            bail!("initial_capital must be positive");
        }
        for (name, v) in [
            ("max_position_pct", self.risk.max_position_pct),
            ("max_exposure_pct", self.risk.max_exposure_pct),
            ("stop_loss_pct", self.risk.stop_loss_pct),
            ("min_confidence", self.risk.min_confidence),
            ("max_daily_loss_pct", self.breakers.max_daily_loss_pct),
        ] {
            if !(0.0..=1.0).contains(&v) {
                bail!("{name} must be within [0, 1], got {v}");
            }
        }
        if self.execution.twap_slices == 0 {
            bail!("twap_slices must be positive");
        }
        Ok(())
    }

    /// Parsed pair list. `validate` must have succeeded for this to be
    /// complete.
    pub fn pair_list(&self) -> Vec<Pair> {
        self.pairs.iter().filter_map(|p| Pair::parse(p)).collect()
    }

    /// The adapter actually used at startup: missing credentials or explicit
    /// simulation mode degrade `real` to `simulation`.
    pub fn effective_exchange(&self) -> ExchangeSelector {
        match self.exchange {
            ExchangeSelector::Real if self.simulation_mode => {
                warn!("simulation_mode set — overriding real exchange selection");
                ExchangeSelector::Simulation
            }
            ExchangeSelector::Real if !self.credentials.has_exchange() => {
                warn!("exchange credentials missing — degrading to simulation");
                ExchangeSelector::Simulation
            }
            other => other,
        }
    }

    /// The strategist mode actually used: a missing LLM key degrades
    /// llm/hybrid to rules.
    pub fn effective_strategist_mode(&self) -> StrategistMode {
        match self.strategist.mode {
            StrategistMode::Rules => StrategistMode::Rules,
            mode if self.credentials.has_llm() => mode,
            _ => {
                warn!("LLM credentials missing — strategist degraded to rules");
                StrategistMode::Rules
            }
        }
    }

    /// Persist the current configuration using an atomic write (tmp + rename).
    /// Credentials are skipped by serde and never written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialize config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Apply a partial runtime update. Only the enumerated subset is
    /// reconfigurable without a restart.
    pub fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(p) = patch.disagreement_penalty {
            self.fusion.disagreement_penalty = p;
        }
        if let Some(w) = patch.default_weights {
            self.fusion.default_weights = w;
        }
        if let Some(w) = patch.regime_weights {
            self.fusion.regime_weights = w;
        }
        if let Some(c) = patch.min_confidence {
            self.risk.min_confidence = c;
        }
        if let Some(s) = patch.stop_loss_pct {
            self.risk.stop_loss_pct = s;
        }
        if let Some(b) = patch.breakers {
            self.breakers = b;
        }
        if let Some(m) = patch.strategist_mode {
            self.strategist.mode = m;
        }
        info!("runtime config patch applied");
    }
}

/// The reconfigurable-at-runtime subset of [`Config`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub disagreement_penalty: Option<f64>,
    pub default_weights: Option<HashMap<String, f64>>,
    pub regime_weights: Option<HashMap<String, HashMap<String, f64>>>,
    pub min_confidence: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub breakers: Option<BreakerConfig>,
    pub strategist_mode: Option<StrategistMode>,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.quote_currency, "AUD");
        assert_eq!(cfg.cycle_interval_minutes, 15);
        assert_eq!(cfg.stage, Stage::Stage1);
        assert!((cfg.risk.max_position_pct - 0.20).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.exchange, ExchangeSelector::Simulation);
        assert_eq!(cfg.pairs, vec!["BTC/AUD", "ETH/AUD"]);
        assert_eq!(cfg.breakers.max_daily_trades, 20);
        assert!(cfg.execution.fallback_to_market);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "stage": "stage3", "pairs": ["SOL/AUD"], "quote_currency": "AUD" }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stage, Stage::Stage3);
        assert_eq!(cfg.pairs, vec!["SOL/AUD"]);
        assert_eq!(cfg.cycle_interval_minutes, 15);
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_mismatched_quote() {
        let mut cfg = Config::default();
        cfg.pairs = vec!["BTC/USD".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_fractions() {
        let mut cfg = Config::default();
        cfg.risk.max_position_pct = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut cfg = Config::default();
        cfg.cycle_interval_minutes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn effective_exchange_degrades_without_credentials() {
        let mut cfg = Config::default();
        cfg.exchange = ExchangeSelector::Real;
        cfg.credentials = Credentials::default();
        assert_eq!(cfg.effective_exchange(), ExchangeSelector::Simulation);

        cfg.credentials.exchange_key = Some("k".into());
        cfg.credentials.exchange_secret = Some("s".into());
        assert_eq!(cfg.effective_exchange(), ExchangeSelector::Real);

        cfg.simulation_mode = true;
        assert_eq!(cfg.effective_exchange(), ExchangeSelector::Simulation);
    }

    #[test]
    fn effective_strategist_degrades_without_llm_key() {
        let mut cfg = Config::default();
        cfg.strategist.mode = StrategistMode::Hybrid;
        assert_eq!(cfg.effective_strategist_mode(), StrategistMode::Rules);

        cfg.credentials.llm_api_key = Some("k".into());
        assert_eq!(cfg.effective_strategist_mode(), StrategistMode::Hybrid);
    }

    #[test]
    fn patch_touches_only_enumerated_fields() {
        let mut cfg = Config::default();
        let pairs_before = cfg.pairs.clone();
        cfg.apply_patch(ConfigPatch {
            min_confidence: Some(0.6),
            strategist_mode: Some(StrategistMode::Hybrid),
            ..Default::default()
        });
        assert!((cfg.risk.min_confidence - 0.6).abs() < f64::EPSILON);
        assert_eq!(cfg.strategist.mode, StrategistMode::Hybrid);
        assert_eq!(cfg.pairs, pairs_before);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.pairs, cfg2.pairs);
        assert_eq!(cfg.stage, cfg2.stage);
        assert_eq!(cfg.execution.order_kind, cfg2.execution.order_kind);
    }
}
