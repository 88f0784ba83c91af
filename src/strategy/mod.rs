// Trading strategy module
pub mod supertrend;

pub use supertrend::{SupertrendConfig, SupertrendStrategy};

use crate::execution::Position;
use crate::indicators::{IndicatorConfig, IndicatorFrame, LatestIndicators};
use crate::models::{Candle, Decision};

/// Recent candles for one pair plus the indicators derived from them
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub pair: String,
    /// Oldest first
    pub candles: Vec<Candle>,
    pub indicators: IndicatorFrame,
}

impl MarketSnapshot {
    pub fn build(pair: &str, candles: Vec<Candle>, config: &IndicatorConfig) -> Self {
        let indicators = IndicatorFrame::compute(&candles, config);
        Self {
            pair: pair.to_string(),
            candles,
            indicators,
        }
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    pub fn latest(&self) -> LatestIndicators {
        self.indicators.latest()
    }
}

/// Base trait for all trading strategies
///
/// Implementations must be pure: the same snapshot and position always yield
/// the same decision, and no input makes them panic. Too little history is
/// answered with `Decision::Hold`.
pub trait Evaluator: Send + Sync {
    /// Decide what to do for one pair given its open position, if any
    fn evaluate(&self, snapshot: &MarketSnapshot, position: Option<&Position>) -> Decision;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for a non-Hold decision
    fn lookback(&self) -> usize;

    /// Indicators the snapshot must carry
    fn indicator_config(&self) -> IndicatorConfig {
        IndicatorConfig::default()
    }
}
