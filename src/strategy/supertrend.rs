use serde::{Deserialize, Serialize};

use super::{Evaluator, MarketSnapshot};
use crate::execution::Position;
use crate::indicators::{IndicatorConfig, Trend};
use crate::models::{Decision, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupertrendConfig {
    pub indicators: IndicatorConfig,
    /// Minimum High Volume Index to confirm an entry
    pub hvi_threshold: f64,
    /// Quote amount committed per entry
    pub stake_amount: f64,
    pub allow_short: bool,
}

impl Default for SupertrendConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorConfig::default(),
            hvi_threshold: 100.0,
            stake_amount: 100.0,
            allow_short: true,
        }
    }
}

/// Trend following with volume confirmation
///
/// Enters long when price is above both moving averages and the Supertrend
/// support while volume spikes above its recent maximum; the short entry is
/// the mirror image. Positions are closed when price loses the Supertrend
/// band or the trend flips.
#[derive(Debug, Clone, Default)]
pub struct SupertrendStrategy {
    config: SupertrendConfig,
}

impl SupertrendStrategy {
    pub fn new(config: SupertrendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupertrendConfig {
        &self.config
    }

    fn quantity(&self, close: f64) -> Option<f64> {
        let quantity = self.config.stake_amount / close;
        (quantity.is_finite() && quantity > 0.0).then_some(quantity)
    }

    fn exit_signal(&self, snapshot: &MarketSnapshot, side: Side) -> Decision {
        let (Some(close), Some(st)) = (snapshot.last_close(), snapshot.latest().supertrend) else {
            return Decision::Hold;
        };

        let exit = match side {
            Side::Long => st.trend == Trend::Down || st.long_band().is_some_and(|b| close < b),
            Side::Short => st.trend == Trend::Up || st.short_band().is_some_and(|b| close > b),
        };

        if exit {
            Decision::Exit
        } else {
            Decision::Hold
        }
    }

    fn entry_signal(&self, snapshot: &MarketSnapshot) -> Decision {
        let latest = snapshot.latest();
        let (Some(close), Some(fast), Some(slow), Some(hvi), Some(st)) = (
            snapshot.last_close(),
            latest.sma_fast,
            latest.sma_slow,
            latest.hvi,
            latest.supertrend,
        ) else {
            return Decision::Hold;
        };

        if hvi <= self.config.hvi_threshold {
            return Decision::Hold;
        }

        let long = close > fast && close > slow && st.long_band().is_some_and(|b| close > b);
        let short = close < fast && close < slow && st.short_band().is_some_and(|b| close < b);

        match self.quantity(close) {
            Some(qty) if long => Decision::EnterLong(qty),
            Some(qty) if short && self.config.allow_short => Decision::EnterShort(qty),
            _ => Decision::Hold,
        }
    }
}

impl Evaluator for SupertrendStrategy {
    fn evaluate(&self, snapshot: &MarketSnapshot, position: Option<&Position>) -> Decision {
        if snapshot.candles.len() < self.lookback() {
            return Decision::Hold;
        }

        match position {
            Some(position) if position.is_open() => self.exit_signal(snapshot, position.side),
            _ => self.entry_signal(snapshot),
        }
    }

    fn name(&self) -> &str {
        "SupertrendStrategy"
    }

    fn lookback(&self) -> usize {
        let ind = &self.config.indicators;
        ind.sma_fast
            .max(ind.sma_slow)
            .max(ind.hvi_period + 1)
            .max(ind.supertrend_period + 1)
    }

    fn indicator_config(&self) -> IndicatorConfig {
        self.config.indicators.clone()
    }
}
