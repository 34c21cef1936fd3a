// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::market_data::Candle;

/// Compute the most recent ATR value from OHLCV candles (oldest first).
///
/// Returns `None` when `period` is zero, there are fewer than `period + 1`
/// candles, or an intermediate value is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut tr_values: Vec<f64> = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        tr_values.push(tr);
    }

    let period_f = period as f64;
    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period_f;
    if !seed.is_finite() {
        return None;
    }

    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return None;
        }
    }

    Some(atr)
}

/// ATR as a fraction of the latest close. Used by the regime detector's
/// volatility rule.
pub fn calculate_atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let atr = calculate_atr(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some(atr / last_close)
}
