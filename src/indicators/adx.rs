// =============================================================================
// Average Directional Index (ADX) with Directional Indicators
// =============================================================================
//
// ADX quantifies trend strength; +DI and -DI carry its direction. The regime
// detector needs all three, so the calculation returns them together.
//
// Pipeline:
//   1. Compute +DM / -DM and True Range per bar.
//   2. Wilder-smooth all three over `period`.
//   3. +DI = smoothed(+DM) / smoothed(TR) * 100, likewise -DI.
//   4. DX  = |+DI - -DI| / (+DI + -DI) * 100.
//   5. ADX = Wilder-smoothed average of DX over `period` bars.
// =============================================================================

use crate::market_data::Candle;

/// Trend-strength reading: ADX plus the final directional indicators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Compute the most recent ADX/+DI/-DI from OHLCV candles (oldest first).
///
/// Returns `None` when `period` is zero, there are fewer than
/// `2 * period + 1` candles, or an intermediate value is non-finite.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<AdxReading> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let period_f = period as f64;
    let n = candles.len();
    let bar_count = n - 1;

    // --- Raw +DM, -DM, TR per bar-to-bar transition --------------------------
    let mut plus_dm = Vec::with_capacity(bar_count);
    let mut minus_dm = Vec::with_capacity(bar_count);
    let mut tr_vals = Vec::with_capacity(bar_count);

    for i in 1..n {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_high = candles[i - 1].high;
        let prev_low = candles[i - 1].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        tr_vals.push(tr);
    }

    // --- Wilder's smoothing and DX series ------------------------------------
    let mut smooth_plus_dm: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus_dm: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(bar_count - period + 1);
    let (mut plus_di, mut minus_di);

    match compute_di_dx(smooth_plus_dm, smooth_minus_dm, smooth_tr) {
        Some((p, m, dx)) => {
            plus_di = p;
            minus_di = m;
            dx_values.push(dx);
        }
        None => return None,
    }

    for i in period..bar_count {
        smooth_plus_dm = smooth_plus_dm - smooth_plus_dm / period_f + plus_dm[i];
        smooth_minus_dm = smooth_minus_dm - smooth_minus_dm / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[i];

        match compute_di_dx(smooth_plus_dm, smooth_minus_dm, smooth_tr) {
            Some((p, m, dx)) => {
                plus_di = p;
                minus_di = m;
                dx_values.push(dx);
            }
            None => return None,
        }
    }

    // --- ADX = Wilder-smoothed DX --------------------------------------------
    if dx_values.len() < period {
        return None;
    }

    let mut adx: f64 = dx_values[..period].iter().sum::<f64>() / period_f;
    for &dx in &dx_values[period..] {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
    }

    if adx.is_finite() && plus_di.is_finite() && minus_di.is_finite() {
        Some(AdxReading {
            adx,
            plus_di,
            minus_di,
        })
    } else {
        None
    }
}

/// Derive (+DI, -DI, DX) from the smoothed sums.
fn compute_di_dx(
    smooth_plus_dm: f64,
    smooth_minus_dm: f64,
    smooth_tr: f64,
) -> Option<(f64, f64, f64)> {
    if smooth_tr == 0.0 {
        return None;
    }

    let plus_di = (smooth_plus_dm / smooth_tr) * 100.0;
    let minus_di = (smooth_minus_dm / smooth_tr) * 100.0;

    let di_sum = plus_di + minus_di;
    let dx = if di_sum == 0.0 {
        0.0
    } else {
        ((plus_di - minus_di).abs() / di_sum) * 100.0
    };

    if dx.is_finite() {
        Some((plus_di, minus_di, dx))
    } else {
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn adx_period_zero() {
        let candles = vec![candle(1.0, 2.0, 0.5, 1.5); 50];
        assert!(calculate_adx(&candles, 0).is_none());
    }

    #[test]
    fn adx_insufficient_data() {
        let candles = vec![candle(1.0, 2.0, 0.5, 1.5); 10];
        assert!(calculate_adx(&candles, 14).is_none());
    }

    #[test]
    fn adx_strong_uptrend_has_positive_di_dominant() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(base, base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();

        let reading = calculate_adx(&candles, 14).unwrap();
        assert!(
            reading.adx > 25.0,
            "expected ADX > 25 for strong trend, got {}",
            reading.adx
        );
        assert!(reading.plus_di > reading.minus_di);
    }

    #[test]
    fn adx_strong_downtrend_has_negative_di_dominant() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 300.0 - i as f64 * 2.0;
                candle(base, base + 0.5, base - 1.5, base - 1.0)
            })
            .collect();

        let reading = calculate_adx(&candles, 14).unwrap();
        assert!(reading.adx > 25.0);
        assert!(reading.minus_di > reading.plus_di);
    }

    #[test]
    fn adx_flat_market_is_near_zero() {
        let candles = vec![candle(100.0, 101.0, 99.0, 100.0); 60];
        let reading = calculate_adx(&candles, 14).unwrap();
        assert!(
            reading.adx < 1.0,
            "expected ADX near 0 for flat market, got {}",
            reading.adx
        );
    }

    #[test]
    fn adx_result_range() {
        let candles: Vec<Candle> = (0..100)
            .map(|i| {
                let base = 50.0 + (i as f64 * 0.3).sin() * 10.0;
                candle(base - 0.5, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        if let Some(reading) = calculate_adx(&candles, 14) {
            assert!((0.0..=100.0).contains(&reading.adx));
            assert!(reading.plus_di >= 0.0 && reading.minus_di >= 0.0);
        }
    }

    #[test]
    fn adx_minimum_candles_exact() {
        let period = 5;
        let min = 2 * period + 1;
        let candles: Vec<Candle> = (0..min)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 1.0, base - 0.5, base + 0.5)
            })
            .collect();
        assert!(calculate_adx(&candles, period).is_some());
        assert!(calculate_adx(&candles[..min - 1], period).is_none());
    }
}
