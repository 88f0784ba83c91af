//! Layered runtime settings.
//!
//! Built-in defaults, then an optional TOML file, then `AUTOTRADER_*`
//! environment variables (`AUTOTRADER_TRADING__PAIRS=BTC/USDT,ETH/USDT`).
//! Credentials may also come from the plain `BINANCE_API_KEY`,
//! `BINANCE_API_SECRET` and `TELEGRAM_TOKEN` variables.

use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::api::binance::{BinanceConfig, BINANCE_FUTURES_BASE};
use crate::engine::EngineConfig;
use crate::execution::RetryPolicy;
use crate::indicators::IndicatorConfig;
use crate::strategy::SupertrendConfig;

pub const DEFAULT_CONFIG_FILE: &str = "autotrader.toml";
const ENV_PREFIX: &str = "AUTOTRADER";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub trading: TradingSettings,
    pub strategy: StrategySettings,
    pub paper: PaperSettings,
    pub telegram: TelegramSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub recv_window_ms: u64,
    pub request_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_BASE.to_string(),
            api_key: None,
            api_secret: None,
            recv_window_ms: 5_000,
            request_timeout_secs: 10,
            rate_limit_per_minute: 1_200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub pairs: Vec<String>,
    pub candle_interval: String,
    pub tick_interval_secs: u64,
    /// Simulated fills instead of live orders
    pub dry_run: bool,
    pub max_submit_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub call_timeout_secs: u64,
    pub pending_order_timeout_secs: u64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            pairs: vec!["RUNE/USDT".to_string()],
            candle_interval: "1m".to_string(),
            tick_interval_secs: 60,
            dry_run: true,
            max_submit_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 5_000,
            call_timeout_secs: 10,
            pending_order_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub stake_amount: f64,
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub hvi_period: usize,
    pub hvi_threshold: f64,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
    pub allow_short: bool,
}

impl Default for StrategySettings {
    fn default() -> Self {
        let strategy = SupertrendConfig::default();
        Self {
            stake_amount: strategy.stake_amount,
            sma_fast: strategy.indicators.sma_fast,
            sma_slow: strategy.indicators.sma_slow,
            hvi_period: strategy.indicators.hvi_period,
            hvi_threshold: strategy.hvi_threshold,
            supertrend_period: strategy.indicators.supertrend_period,
            supertrend_multiplier: strategy.indicators.supertrend_multiplier,
            allow_short: strategy.allow_short,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperSettings {
    pub initial_balance: f64,
    /// Defaults to the quote asset of the first pair
    pub quote_asset: Option<String>,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            quote_asset: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub token: Option<String>,
    /// Empty means every chat may send commands
    pub allowed_chat_ids: Vec<i64>,
    pub poll_timeout_secs: u64,
    pub queue_capacity: usize,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: None,
            allowed_chat_ids: Vec::new(),
            poll_timeout_secs: 30,
            queue_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `None` keeps trade history in memory only
    pub url: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: Some("sqlite://autotrader.db".to_string()),
        }
    }
}

impl Settings {
    /// Load settings; a missing file is fine unless it was named explicitly
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("trading.pairs")
                    .with_list_parse_key("telegram.allowed_chat_ids")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.apply_credential_env();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_credential_env(&mut self) {
        fill_from_env(&mut self.exchange.api_key, "BINANCE_API_KEY");
        fill_from_env(&mut self.exchange.api_secret, "BINANCE_API_SECRET");
        fill_from_env(&mut self.telegram.token, "TELEGRAM_TOKEN");
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.trading.pairs.is_empty() {
            return Err("trading.pairs must name at least one pair".into());
        }
        if let Some(pair) = self.trading.pairs.iter().find(|p| !p.contains('/')) {
            return Err(format!("pair {:?} must be written as BASE/QUOTE", pair).into());
        }
        if self.trading.tick_interval_secs == 0 {
            return Err("trading.tick_interval_secs must be positive".into());
        }
        if self.trading.max_submit_attempts == 0 {
            return Err("trading.max_submit_attempts must be at least 1".into());
        }
        if self.strategy.stake_amount <= 0.0 {
            return Err("strategy.stake_amount must be positive".into());
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.trading.max_submit_attempts,
            backoff_base: Duration::from_millis(self.trading.backoff_base_ms),
            backoff_max: Duration::from_millis(self.trading.backoff_max_ms),
            call_timeout: Duration::from_secs(self.trading.call_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            pairs: self.trading.pairs.clone(),
            candle_interval: self.trading.candle_interval.clone(),
            tick_interval: Duration::from_secs(self.trading.tick_interval_secs),
            retry: self.retry_policy(),
            pending_order_timeout: Duration::from_secs(self.trading.pending_order_timeout_secs),
        }
    }

    pub fn strategy_config(&self) -> SupertrendConfig {
        let s = &self.strategy;
        SupertrendConfig {
            indicators: IndicatorConfig {
                sma_fast: s.sma_fast,
                sma_slow: s.sma_slow,
                hvi_period: s.hvi_period,
                supertrend_period: s.supertrend_period,
                supertrend_multiplier: s.supertrend_multiplier,
            },
            hvi_threshold: s.hvi_threshold,
            stake_amount: s.stake_amount,
            allow_short: s.allow_short,
        }
    }

    pub fn binance_config(&self) -> BinanceConfig {
        BinanceConfig {
            base_url: self.exchange.base_url.clone(),
            api_key: self.exchange.api_key.clone(),
            api_secret: self.exchange.api_secret.clone(),
            recv_window_ms: self.exchange.recv_window_ms,
            request_timeout: Duration::from_secs(self.exchange.request_timeout_secs),
            rate_limit_per_minute: self.exchange.rate_limit_per_minute,
        }
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.as_deref().map_or(true, str::is_empty) {
        if let Ok(value) = std::env::var(var) {
            *slot = Some(value);
        }
    }
}
