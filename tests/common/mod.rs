//! Fakes shared by the engine integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use autotrader::error::{ExchangeError, MarketDataError};
use autotrader::execution::{
    ExchangeClient, MarketDataGateway, OrderAck, OrderRequest, OrderStatus, Position,
    RetryPolicy,
};
use autotrader::indicators::IndicatorConfig;
use autotrader::strategy::{Evaluator, MarketSnapshot};
use autotrader::{AssetBalance, Balance, Candle, Decision};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub fn candles(price: f64, count: usize) -> Vec<Candle> {
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    (0..count as i64)
        .map(|i| Candle {
            timestamp: start + ChronoDuration::minutes(i),
            open: price,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume: 100.0,
        })
        .collect()
}

/// Retry policy with millisecond backoff so failure scenarios finish quickly
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(2),
        jitter_factor: 0.0,
        call_timeout: Duration::from_secs(1),
    }
}

/// Poll `condition` every few milliseconds, failing the test after two seconds
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

/// Gateway serving flat candles, optionally slow or failing per pair
pub struct FakeGateway {
    pub prices: Mutex<HashMap<String, f64>>,
    pub failing: Mutex<Vec<String>>,
    pub delay: Duration,
    pub fetches: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: Mutex::new(prices.iter().map(|(p, v)| (p.to_string(), *v)).collect()),
            failing: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }
}

#[async_trait]
impl MarketDataGateway for FakeGateway {
    async fn fetch_candles(
        &self,
        pair: &str,
        _interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        self.fetches.lock().push(pair.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.lock().iter().any(|p| p == pair) {
            return Err(MarketDataError::DataUnavailable(format!("{} feed down", pair)));
        }
        let price = self.prices.lock().get(pair).copied().ok_or_else(|| {
            MarketDataError::DataUnavailable(format!("unknown pair {}", pair))
        })?;
        Ok(candles(price, lookback.max(1)))
    }
}

/// Evaluator replaying a per-pair script of decisions, then holding
#[derive(Default)]
pub struct ScriptedEvaluator {
    pub script: Mutex<HashMap<String, VecDeque<Decision>>>,
    pub repeat: Mutex<HashMap<String, Decision>>,
    pub calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedEvaluator {
    pub fn with_script(pair: &str, decisions: Vec<Decision>) -> Self {
        let evaluator = Self::default();
        evaluator.push(pair, decisions);
        evaluator
    }

    /// Return `decision` for every evaluation of `pair`
    pub fn always(pair: &str, decision: Decision) -> Self {
        let evaluator = Self::default();
        evaluator.repeat.lock().insert(pair.to_string(), decision);
        evaluator
    }

    pub fn push(&self, pair: &str, decisions: Vec<Decision>) {
        self.script
            .lock()
            .entry(pair.to_string())
            .or_default()
            .extend(decisions);
    }

    pub fn calls_for(&self, pair: &str) -> usize {
        self.calls.lock().iter().filter(|(p, _)| p == pair).count()
    }
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&self, snapshot: &MarketSnapshot, position: Option<&Position>) -> Decision {
        self.calls
            .lock()
            .push((snapshot.pair.clone(), position.is_some()));

        if let Some(decision) = self
            .script
            .lock()
            .get_mut(&snapshot.pair)
            .and_then(|queue| queue.pop_front())
        {
            return decision;
        }
        self.repeat
            .lock()
            .get(&snapshot.pair)
            .copied()
            .unwrap_or(Decision::Hold)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn lookback(&self) -> usize {
        5
    }

    fn indicator_config(&self) -> IndicatorConfig {
        IndicatorConfig::default()
    }
}

/// Exchange replaying scripted submit results; unscripted submissions fill at
/// `fill_price`. Orders are remembered so queries and lookups find them.
pub struct FakeExchange {
    pub submit_script: Mutex<VecDeque<Result<OrderAck, ExchangeError>>>,
    pub submissions: Mutex<Vec<OrderRequest>>,
    pub orders: Mutex<HashMap<String, OrderAck>>,
    pub keys: Mutex<HashMap<String, String>>,
    pub cancels: Mutex<Vec<String>>,
    pub fill_price: Mutex<f64>,
}

impl FakeExchange {
    pub fn new(fill_price: f64) -> Self {
        Self {
            submit_script: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            orders: Mutex::new(HashMap::new()),
            keys: Mutex::new(HashMap::new()),
            cancels: Mutex::new(Vec::new()),
            fill_price: Mutex::new(fill_price),
        }
    }

    pub fn script(&self, results: Vec<Result<OrderAck, ExchangeError>>) {
        self.submit_script.lock().extend(results);
    }

    /// Overwrite what the exchange reports for an order id
    pub fn set_order(&self, ack: OrderAck) {
        self.orders
            .lock()
            .insert(ack.exchange_order_id.clone(), ack);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

pub fn ack(id: &str, status: OrderStatus, filled: f64, price: Option<f64>) -> OrderAck {
    OrderAck {
        exchange_order_id: id.to_string(),
        status,
        filled_quantity: filled,
        avg_price: price,
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let n = {
            let mut submissions = self.submissions.lock();
            submissions.push(request.clone());
            submissions.len()
        };

        let scripted = self.submit_script.lock().pop_front();
        let result = scripted.unwrap_or_else(|| {
            Ok(ack(
                &format!("ex-{}", n),
                OrderStatus::Filled,
                request.quantity,
                Some(*self.fill_price.lock()),
            ))
        });

        if let Ok(ack) = &result {
            self.set_order(ack.clone());
            self.keys
                .lock()
                .insert(request.idempotency_key.clone(), ack.exchange_order_id.clone());
        }
        result
    }

    async fn query_order(&self, _pair: &str, id: &str) -> Result<OrderAck, ExchangeError> {
        self.orders
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ExchangeError::fatal(-2013, "Order does not exist."))
    }

    async fn find_order(&self, _pair: &str, key: &str) -> Result<Option<OrderAck>, ExchangeError> {
        let id = self.keys.lock().get(key).cloned();
        Ok(id.and_then(|id| self.orders.lock().get(&id).cloned()))
    }

    async fn cancel_order(&self, _pair: &str, id: &str) -> Result<(), ExchangeError> {
        self.cancels.lock().push(id.to_string());
        Ok(())
    }

    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        Ok(Balance::from([(
            "USDT".to_string(),
            AssetBalance {
                available: 5_000.0,
                locked: 250.0,
            },
        )]))
    }

    fn name(&self) -> &str {
        "fake"
    }
}
