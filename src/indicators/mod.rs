// Technical indicators module
// SMA, ATR, Supertrend and High Volume Index over candle series

pub mod atr;
pub mod moving_average;
pub mod supertrend;
pub mod volume;

pub use atr::{calculate_atr, calculate_atr_series};
pub use moving_average::{calculate_sma, calculate_sma_series};
pub use supertrend::{calculate_supertrend, SupertrendPoint, Trend};
pub use volume::calculate_hvi_series;

use crate::models::Candle;
use serde::{Deserialize, Serialize};

/// Which indicators to derive for a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub hvi_period: usize,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_fast: 20,
            sma_slow: 100,
            hvi_period: 10,
            supertrend_period: 7,
            supertrend_multiplier: 3.0,
        }
    }
}

/// Indicator series aligned one-to-one with the candles they were computed from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorFrame {
    pub sma_fast: Vec<Option<f64>>,
    pub sma_slow: Vec<Option<f64>>,
    pub hvi: Vec<Option<f64>>,
    pub supertrend: Vec<Option<SupertrendPoint>>,
}

/// Latest value of every indicator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatestIndicators {
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub hvi: Option<f64>,
    pub supertrend: Option<SupertrendPoint>,
}

impl IndicatorFrame {
    pub fn compute(candles: &[Candle], config: &IndicatorConfig) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        Self {
            sma_fast: calculate_sma_series(&closes, config.sma_fast),
            sma_slow: calculate_sma_series(&closes, config.sma_slow),
            hvi: calculate_hvi_series(&volumes, config.hvi_period),
            supertrend: calculate_supertrend(
                candles,
                config.supertrend_period,
                config.supertrend_multiplier,
            ),
        }
    }

    pub fn latest(&self) -> LatestIndicators {
        LatestIndicators {
            sma_fast: self.sma_fast.last().copied().flatten(),
            sma_slow: self.sma_slow.last().copied().flatten(),
            hvi: self.hvi.last().copied().flatten(),
            supertrend: self.supertrend.last().copied().flatten(),
        }
    }
}
