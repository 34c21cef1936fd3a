// =============================================================================
// LLM Strategist — structured proposals from a chat-completion endpoint
// =============================================================================
//
// Assembles a compact prompt from the portfolio, the fused signal, the
// regime, and recent trade history, then calls an OpenAI-compatible chat
// endpoint and parses a strict JSON verdict `{action, confidence, reasoning}`.
//
// The caller owns timeout and fallback policy; this module reports parse
// failures as errors and never invents a verdict.
// =============================================================================

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::costs::LlmUsage;
use crate::fusion::FusedSignal;
use crate::ledger::{Portfolio, RealizedTrade};
use crate::types::{Pair, TradeAction};

use super::Proposal;

/// Default OpenAI-compatible endpoint.
const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Flat price assumptions per million tokens, for budget accounting.
const INPUT_USD_PER_MTOK: f64 = 0.60;
const OUTPUT_USD_PER_MTOK: f64 = 2.40;

const SYSTEM_PROMPT: &str = "You are the strategist of a spot crypto trading engine. \
Respond with a single JSON object {\"action\": \"BUY\"|\"SELL\"|\"HOLD\", \
\"confidence\": 0.0-1.0, \"reasoning\": \"...\"} and nothing else. \
Prefer HOLD when the evidence is mixed.";

pub struct LlmStrategist {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// The strict verdict shape the model must return.
#[derive(Debug, Deserialize)]
struct Verdict {
    action: String,
    confidence: f64,
    reasoning: String,
}

impl LlmStrategist {
    pub fn new(
        api_key: impl Into<String>,
        api_url: Option<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One strategist call. Returns the proposal plus the usage record for
    /// cost accounting.
    pub async fn propose(
        &self,
        pair: &Pair,
        fused: &FusedSignal,
        portfolio: &Portfolio,
        recent_trades: &[RealizedTrade],
        base_order_quote: f64,
        cycle_id: u64,
    ) -> Result<(Proposal, LlmUsage)> {
        let prompt = build_prompt(pair, fused, portfolio, recent_trades, base_order_quote);

        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("LLM endpoint returned {status}: {text}");
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("failed to parse LLM response body")?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .context("LLM response contained no choices")?;

        let verdict = parse_verdict(content)?;
        let action = match verdict.action.to_uppercase().as_str() {
            "BUY" => TradeAction::Buy,
            "SELL" => TradeAction::Sell,
            "HOLD" => TradeAction::Hold,
            other => bail!("LLM returned unknown action '{other}'"),
        };

        let confidence = verdict.confidence.clamp(0.0, 1.0);

        // Size by confidence, the same convention the rule strategist uses;
        // SELL sizes in base against the held position.
        let size = match action {
            TradeAction::Buy => base_order_quote * confidence,
            TradeAction::Sell => portfolio
                .position(pair)
                .map(|p| p.quantity_base)
                .unwrap_or(0.0),
            TradeAction::Hold => 0.0,
        };

        let chat_usage = parsed.usage.unwrap_or_default();
        let usage = LlmUsage {
            input_tokens: chat_usage.prompt_tokens,
            output_tokens: chat_usage.completion_tokens,
            cost_usd: chat_usage.prompt_tokens as f64 / 1e6 * INPUT_USD_PER_MTOK
                + chat_usage.completion_tokens as f64 / 1e6 * OUTPUT_USD_PER_MTOK,
            model: self.model.clone(),
            cycle_id,
            cached_hit: false,
            at: chrono::Utc::now(),
        };

        debug!(
            pair = %pair,
            action = %action,
            confidence,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "LLM verdict parsed"
        );

        Ok((
            Proposal {
                action,
                size,
                confidence,
                reasoning: verdict.reasoning,
                model: self.model.clone(),
                fallback: false,
            },
            usage,
        ))
    }
}

/// Assemble the user prompt. Compact and line-oriented: models follow it
/// better and the token bill stays small.
fn build_prompt(
    pair: &Pair,
    fused: &FusedSignal,
    portfolio: &Portfolio,
    recent_trades: &[RealizedTrade],
    base_order_quote: f64,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("Pair: {pair}\n"));
    prompt.push_str(&format!(
        "Fused signal: direction={:+.3} confidence={:.3} disagreement={:.3} regime={}\n",
        fused.direction, fused.confidence, fused.disagreement, fused.regime
    ));
    for signal in &fused.contributing {
        prompt.push_str(&format!(
            "  - {}: direction={:+.2} confidence={:.2} ({})\n",
            signal.source, signal.direction, signal.confidence, signal.reasoning
        ));
    }
    prompt.push_str(&format!(
        "Portfolio: available={:.2} total={:.2}\n",
        portfolio.available_quote, portfolio.total_value
    ));
    if let Some(position) = portfolio.position(pair) {
        prompt.push_str(&format!(
            "Open position: qty={:.8} entry={:.2} unrealized={:+.2}\n",
            position.quantity_base, position.entry_price, position.unrealized_pnl
        ));
    } else {
        prompt.push_str("Open position: none\n");
    }
    if recent_trades.is_empty() {
        prompt.push_str("Recent trades: none\n");
    } else {
        prompt.push_str("Recent trades:\n");
        for trade in recent_trades.iter().take(5) {
            prompt.push_str(&format!(
                "  - {} qty={:.8} entry={:.2} exit={:.2} pnl={:+.2}\n",
                trade.pair, trade.quantity, trade.entry_price, trade.exit_price, trade.pnl
            ));
        }
    }
    prompt.push_str(&format!(
        "A BUY would be sized near {base_order_quote:.0} quote units scaled by your confidence.\n"
    ));
    prompt.push_str("Decide: BUY, SELL, or HOLD.");
    prompt
}

/// Parse the model's verdict, tolerating markdown code fences around the
/// JSON but nothing else.
fn parse_verdict(content: &str) -> Result<Verdict> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(stripped)
        .with_context(|| format!("LLM verdict is not valid JSON: {stripped}"))
}
