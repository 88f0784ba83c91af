//! Scripted exchange and gateway doubles for unit tests.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::exchange::{ExchangeClient, MarketDataGateway};
use super::order::{OrderAck, OrderRequest, OrderStatus};
use crate::error::{ExchangeError, MarketDataError};
use crate::models::{AssetBalance, Balance, Candle};

pub fn candle(minute: i64, close: f64, volume: f64) -> Candle {
    Candle {
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(minute),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume,
    }
}

/// Gateway returning the same candles for every request
pub struct StaticGateway {
    pub candles: HashMap<String, Vec<Candle>>,
}

impl StaticGateway {
    pub fn flat(pair: &str, price: f64, count: usize) -> Self {
        let candles = (0..count as i64).map(|i| candle(i, price, 100.0)).collect();
        Self {
            candles: HashMap::from([(pair.to_string(), candles)]),
        }
    }
}

#[async_trait]
impl MarketDataGateway for StaticGateway {
    async fn fetch_candles(
        &self,
        pair: &str,
        _interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let candles = self
            .candles
            .get(pair)
            .ok_or_else(|| MarketDataError::DataUnavailable(format!("unknown pair {}", pair)))?;
        let start = candles.len().saturating_sub(lookback);
        Ok(candles[start..].to_vec())
    }
}

/// Exchange that answers submissions from a script, then acks as filled
#[derive(Default)]
pub struct ScriptedExchange {
    pub submit_script: Mutex<VecDeque<Result<OrderAck, ExchangeError>>>,
    pub submissions: Mutex<Vec<OrderRequest>>,
    pub known_orders: Mutex<HashMap<String, OrderAck>>,
    pub lookups: Mutex<Vec<String>>,
}

impl ScriptedExchange {
    pub fn with_script(script: Vec<Result<OrderAck, ExchangeError>>) -> Self {
        Self {
            submit_script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn filled(id: &str, quantity: f64, price: f64) -> OrderAck {
        OrderAck {
            exchange_order_id: id.to_string(),
            status: OrderStatus::Filled,
            filled_quantity: quantity,
            avg_price: Some(price),
        }
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.submissions.lock().push(request.clone());
        let next = self.submit_script.lock().pop_front();
        let result = next.unwrap_or_else(|| {
            let id = format!("{}", self.submissions.lock().len());
            Ok(Self::filled(&id, request.quantity, 100.0))
        });
        if let Ok(ack) = &result {
            self.known_orders
                .lock()
                .insert(request.idempotency_key.clone(), ack.clone());
        }
        result
    }

    async fn query_order(&self, _pair: &str, id: &str) -> Result<OrderAck, ExchangeError> {
        self.known_orders
            .lock()
            .values()
            .find(|a| a.exchange_order_id == id)
            .cloned()
            .ok_or_else(|| ExchangeError::fatal(-2013, "Order does not exist."))
    }

    async fn find_order(&self, _pair: &str, key: &str) -> Result<Option<OrderAck>, ExchangeError> {
        self.lookups.lock().push(key.to_string());
        Ok(self.known_orders.lock().get(key).cloned())
    }

    async fn cancel_order(&self, _pair: &str, _id: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        Ok(Balance::from([(
            "USDT".to_string(),
            AssetBalance {
                available: 1_000.0,
                locked: 0.0,
            },
        )]))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
