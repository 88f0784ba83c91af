use super::atr::calculate_atr_series;
use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
}

/// Supertrend value for one candle
///
/// In an up-trend the active band is the (ratcheting) lower band, in a
/// down-trend the upper band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupertrendPoint {
    pub trend: Trend,
    pub band: f64,
}

impl SupertrendPoint {
    /// Trailing support, only defined while trending up
    pub fn long_band(&self) -> Option<f64> {
        (self.trend == Trend::Up).then_some(self.band)
    }

    /// Trailing resistance, only defined while trending down
    pub fn short_band(&self) -> Option<f64> {
        (self.trend == Trend::Down).then_some(self.band)
    }
}

/// Supertrend series aligned with the candles
///
/// Bands are `hl2 ± multiplier × ATR(period)`. The trend flips up when the close
/// crosses the previous upper band and down when it crosses the previous lower
/// band; while the trend holds, the active band only moves in its favour.
pub fn calculate_supertrend(
    candles: &[Candle],
    period: usize,
    multiplier: f64,
) -> Vec<Option<SupertrendPoint>> {
    let atr = calculate_atr_series(candles, period);
    let mut series = vec![None; candles.len()];

    let Some(start) = atr.iter().position(|v| v.is_some()) else {
        return series;
    };

    let bands = |i: usize, atr: f64| {
        let hl2 = (candles[i].high + candles[i].low) / 2.0;
        (hl2 + multiplier * atr, hl2 - multiplier * atr)
    };

    let (mut prev_upper, mut prev_lower) = match atr[start] {
        Some(v) => bands(start, v),
        None => return series,
    };
    let mut trend = Trend::Up;
    series[start] = Some(SupertrendPoint {
        trend,
        band: prev_lower,
    });

    for i in (start + 1)..candles.len() {
        let Some(atr_value) = atr[i] else { continue };
        let (mut upper, mut lower) = bands(i, atr_value);
        let close = candles[i].close;

        if close > prev_upper {
            trend = Trend::Up;
        } else if close < prev_lower {
            trend = Trend::Down;
        } else {
            if trend == Trend::Up && lower < prev_lower {
                lower = prev_lower;
            }
            if trend == Trend::Down && upper > prev_upper {
                upper = prev_upper;
            }
        }

        let band = match trend {
            Trend::Up => lower,
            Trend::Down => upper,
        };
        series[i] = Some(SupertrendPoint { trend, band });

        prev_upper = upper;
        prev_lower = lower;
    }

    series
}
