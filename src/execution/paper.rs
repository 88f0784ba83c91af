use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::exchange::{ExchangeClient, MarketDataGateway};
use super::order::{OrderAck, OrderRequest, OrderStatus};
use crate::error::ExchangeError;
use crate::models::{quote_asset, AssetBalance, Balance, OrderSide};

/// One simulated fill
#[derive(Debug, Clone)]
struct PaperFill {
    pair: String,
    ack: OrderAck,
}

#[derive(Debug)]
struct PaperBook {
    cash: f64,
    next_id: u64,
    /// Keyed by idempotency key so resubmissions return the original fill
    fills: HashMap<String, PaperFill>,
}

/// Dry-run exchange
///
/// Market orders fill immediately at the last close reported by the gateway.
/// The simulated quote balance moves by the notional of every fill.
pub struct PaperExchange {
    gateway: Arc<dyn MarketDataGateway>,
    candle_interval: String,
    quote_asset: String,
    book: Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        candle_interval: &str,
        quote_asset: &str,
        initial_balance: f64,
    ) -> Self {
        Self {
            gateway,
            candle_interval: candle_interval.to_string(),
            quote_asset: quote_asset.to_string(),
            book: Mutex::new(PaperBook {
                cash: initial_balance,
                next_id: 1,
                fills: HashMap::new(),
            }),
        }
    }

    /// Simulated quote balance
    pub fn cash(&self) -> f64 {
        self.book.lock().cash
    }

    async fn last_price(&self, pair: &str) -> Result<f64, ExchangeError> {
        let candles = self
            .gateway
            .fetch_candles(pair, &self.candle_interval, 1)
            .await
            .map_err(|e| ExchangeError::retryable(-1, e.to_string()))?;

        candles
            .last()
            .map(|c| c.close)
            .ok_or_else(|| ExchangeError::retryable(-1, format!("no price for {}", pair)))
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        if let Some(existing) = self.book.lock().fills.get(&request.idempotency_key) {
            return Ok(existing.ack.clone());
        }

        if request.quantity <= 0.0 || !request.quantity.is_finite() {
            return Err(ExchangeError::fatal(-4003, "quantity must be positive"));
        }

        let price = match request.price {
            Some(limit) => limit,
            None => self.last_price(&request.pair).await?,
        };
        let notional = price * request.quantity;

        let mut book = self.book.lock();
        // Another submission with the same key may have landed while we fetched the price
        if let Some(existing) = book.fills.get(&request.idempotency_key) {
            return Ok(existing.ack.clone());
        }

        match request.side {
            OrderSide::Buy if !request.reduce_only => {
                if notional > book.cash {
                    return Err(ExchangeError::fatal(
                        -2019,
                        format!("margin is insufficient: need {:.2}, have {:.2}", notional, book.cash),
                    ));
                }
                book.cash -= notional;
            }
            OrderSide::Buy => book.cash -= notional,
            OrderSide::Sell => book.cash += notional,
        }

        let ack = OrderAck {
            exchange_order_id: format!("paper-{}", book.next_id),
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            avg_price: Some(price),
        };
        book.next_id += 1;
        book.fills.insert(
            request.idempotency_key.clone(),
            PaperFill {
                pair: request.pair.clone(),
                ack: ack.clone(),
            },
        );

        tracing::info!(
            pair = %request.pair,
            "Simulated {} order for {:.6} @ {:.4} (order id {})",
            request.side,
            request.quantity,
            price,
            ack.exchange_order_id
        );

        Ok(ack)
    }

    async fn query_order(
        &self,
        pair: &str,
        exchange_order_id: &str,
    ) -> Result<OrderAck, ExchangeError> {
        self.book
            .lock()
            .fills
            .values()
            .find(|f| f.pair == pair && f.ack.exchange_order_id == exchange_order_id)
            .map(|f| f.ack.clone())
            .ok_or_else(|| ExchangeError::fatal(-2013, "Order does not exist."))
    }

    async fn find_order(
        &self,
        pair: &str,
        idempotency_key: &str,
    ) -> Result<Option<OrderAck>, ExchangeError> {
        Ok(self
            .book
            .lock()
            .fills
            .get(idempotency_key)
            .filter(|f| f.pair == pair)
            .map(|f| f.ack.clone()))
    }

    async fn cancel_order(&self, pair: &str, exchange_order_id: &str) -> Result<(), ExchangeError> {
        // Paper orders fill on submission, nothing is ever left to cancel
        self.query_order(pair, exchange_order_id).await?;
        Err(ExchangeError::fatal(-2011, "Unknown order sent."))
    }

    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        let cash = self.cash();
        let mut balance = Balance::new();
        balance.insert(
            self.quote_asset.clone(),
            AssetBalance {
                available: cash,
                locked: 0.0,
            },
        );
        Ok(balance)
    }

    fn name(&self) -> &str {
        "paper"
    }
}

/// Quote asset of the first pair, falling back to USDT
pub fn default_quote_asset(pairs: &[String]) -> String {
    pairs
        .first()
        .and_then(|p| quote_asset(p))
        .unwrap_or("USDT")
        .to_string()
}
