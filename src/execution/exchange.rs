use async_trait::async_trait;

use super::order::{OrderAck, OrderRequest};
use crate::error::{ExchangeError, MarketDataError};
use crate::models::{Balance, Candle};

/// Source of OHLCV candles
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Most recent `lookback` candles for a pair, oldest first
    async fn fetch_candles(
        &self,
        pair: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>, MarketDataError>;
}

/// Order entry and account queries on the remote venue
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit an order; resubmitting the same request must be deduplicated by its key
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// Current state of an acknowledged order
    async fn query_order(
        &self,
        pair: &str,
        exchange_order_id: &str,
    ) -> Result<OrderAck, ExchangeError>;

    /// Look an order up by idempotency key; `None` if the exchange never saw it
    async fn find_order(
        &self,
        pair: &str,
        idempotency_key: &str,
    ) -> Result<Option<OrderAck>, ExchangeError>;

    async fn cancel_order(&self, pair: &str, exchange_order_id: &str) -> Result<(), ExchangeError>;

    async fn get_balance(&self) -> Result<Balance, ExchangeError>;

    /// Venue name for logs
    fn name(&self) -> &str;
}
