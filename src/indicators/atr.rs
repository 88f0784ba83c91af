/// Average True Range (ATR) indicator
///
/// Measures market volatility by calculating the average of true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing for the moving average.

use crate::models::Candle;

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let high = pair[1].high;
            let low = pair[1].low;
            let prev_close = pair[0].close;

            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect()
}

/// Calculate ATR for the given candles
///
/// Returns the current ATR value, or None if insufficient data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    calculate_atr_series(candles, period)
        .last()
        .copied()
        .flatten()
}

/// ATR aligned with the candles
///
/// The first value appears at index `period` (it needs `period` true ranges,
/// and the first true range needs a previous close).
pub fn calculate_atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; candles.len()];
    if period == 0 || candles.len() < period + 1 {
        return series;
    }

    let trs = true_ranges(candles);

    // First ATR is simple average of first 'period' true ranges
    let mut atr = trs.iter().take(period).sum::<f64>() / period as f64;
    series[period] = Some(atr);

    for (offset, tr) in trs.iter().enumerate().skip(period) {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        // trs[k] belongs to candle k + 1
        series[offset + 1] = Some(atr);
    }

    series
}
