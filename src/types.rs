// =============================================================================
// Shared types used across the Meridian trading core
// =============================================================================

use serde::{Deserialize, Serialize};

/// An ordered base/quote trading instrument, e.g. `BTC/AUD`.
///
/// The canonical textual form is `BASE/QUOTE`; exchange adapters map this to
/// their own wire encoding.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Parse the canonical `BASE/QUOTE` form. Returns `None` when either leg
    /// is empty or the separator is missing.
    pub fn parse(s: &str) -> Option<Self> {
        let (base, quote) = s.split_once('/')?;
        if base.trim().is_empty() || quote.trim().is_empty() {
            return None;
        }
        Some(Self::new(base.trim(), quote.trim()))
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// The action a strategist proposes for a pair in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn side(self) -> Option<Side> {
        match self {
            Self::Buy => Some(Side::Buy),
            Self::Sell => Some(Side::Sell),
            Self::Hold => None,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// What caused a cycle to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleTrigger {
    Scheduled,
    Manual,
    Reactive,
}

impl std::fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
            Self::Reactive => write!(f, "reactive"),
        }
    }
}

/// Terminal status of a completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Ok,
    Partial,
    Failed,
    Aborted,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parse_and_display() {
        let p = Pair::parse("btc/aud").unwrap();
        assert_eq!(p.base, "BTC");
        assert_eq!(p.quote, "AUD");
        assert_eq!(p.to_string(), "BTC/AUD");
    }

    #[test]
    fn pair_parse_rejects_malformed() {
        assert!(Pair::parse("BTCAUD").is_none());
        assert!(Pair::parse("/AUD").is_none());
        assert!(Pair::parse("BTC/").is_none());
    }

    #[test]
    fn action_to_side() {
        assert_eq!(TradeAction::Buy.side(), Some(Side::Buy));
        assert_eq!(TradeAction::Sell.side(), Some(Side::Sell));
        assert_eq!(TradeAction::Hold.side(), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(TradeAction::Hold.to_string(), "HOLD");
        assert_eq!(CycleTrigger::Reactive.to_string(), "reactive");
        assert_eq!(CycleStatus::Partial.to_string(), "partial");
    }
}
